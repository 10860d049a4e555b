//! 会话进度跟踪
//!
//! 记录当前连接的对端、双向的文件列表以及按文件名索引的进度。
//! 同一时刻至多一个活动连接。

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use super::FileSummary;

/// 单个文件的进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProgress {
    pub name: String,
    pub size: Option<u64>,
    pub percent: u8,
}

/// 某一时刻的会话状态，供界面展示
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub remote_peer: Option<String>,
    pub connected: bool,
    pub outgoing: Vec<FileProgress>,
    pub incoming: Vec<FileProgress>,
}

#[derive(Debug, Default)]
struct Direction {
    files: Vec<FileSummary>,
    progress: HashMap<String, u8>,
}

impl Direction {
    fn add(&mut self, summary: FileSummary) {
        self.files.push(summary);
    }

    fn set(&mut self, name: &str, percent: u8) {
        self.progress.insert(name.to_string(), percent);
    }

    fn get(&self, name: &str) -> Option<u8> {
        self.progress.get(name).copied()
    }

    /// 先按文件列表顺序，再补上只出现在进度表里的文件名
    fn snapshot(&self) -> Vec<FileProgress> {
        let mut out: Vec<FileProgress> = self
            .files
            .iter()
            .map(|f| FileProgress {
                name: f.name.clone(),
                size: Some(f.size),
                percent: self.get(&f.name).unwrap_or(0),
            })
            .collect();

        let mut extra: Vec<_> = self
            .progress
            .iter()
            .filter(|(name, _)| !self.files.iter().any(|f| &f.name == *name))
            .map(|(name, percent)| FileProgress {
                name: name.clone(),
                size: None,
                percent: *percent,
            })
            .collect();
        extra.sort_by(|a, b| a.name.cmp(&b.name));
        out.extend(extra);
        out
    }
}

/// 传输会话跟踪器
#[derive(Debug, Default)]
pub struct SessionTracker {
    remote_peer: Option<String>,
    connected: bool,
    outgoing: Direction,
    incoming: Direction,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始与 `remote_id` 的新会话，之前的记录全部清空
    pub fn open(&mut self, remote_id: impl Into<String>) {
        self.reset();
        let remote_id = remote_id.into();
        debug!("Session opened with {remote_id}");
        self.remote_peer = Some(remote_id);
        self.connected = true;
    }

    /// 标记连接已关闭，进度保留以便生成报告
    pub fn close(&mut self) {
        if self.connected {
            debug!(
                "Session with {} closed",
                self.remote_peer.as_deref().unwrap_or("<unknown>")
            );
        }
        self.connected = false;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn remote_peer(&self) -> Option<&str> {
        self.remote_peer.as_deref()
    }

    pub fn add_outgoing(&mut self, summary: FileSummary) {
        self.outgoing.add(summary);
    }

    pub fn add_incoming(&mut self, summary: FileSummary) {
        self.incoming.add(summary);
    }

    /// 对端确认收到文件
    pub fn record_outgoing_ack(&mut self, file_name: &str) {
        self.outgoing.set(file_name, 100);
    }

    /// 记录接收进度，按给定值覆盖
    pub fn record_incoming_progress(&mut self, file_name: &str, percent: u8) {
        self.incoming.set(file_name, percent.min(100));
    }

    pub fn outgoing_progress(&self, file_name: &str) -> Option<u8> {
        self.outgoing.get(file_name)
    }

    pub fn incoming_progress(&self, file_name: &str) -> Option<u8> {
        self.incoming.get(file_name)
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            remote_peer: self.remote_peer.clone(),
            connected: self.connected,
            outgoing: self.outgoing.snapshot(),
            incoming: self.incoming.snapshot(),
        }
    }
}
