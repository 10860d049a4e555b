//! 发送端工作流
//!
//! 高层 API 封装完整的发送流程:
//! 1. 按顺序发送每个文件（元数据、分块、`end`）
//! 2. 收集接收端对每个文件的确认
//! 3. 全部完成后发送 `finished`
//!
//! 没有超时：对端停止响应时一直等待，直到连接关闭。

use crate::config::{AckMode, AppSettings};
use crate::notice::Notice;
use crate::transfer::encoder::{ChunkEncoder, FileSendReport};
use crate::transfer::{
    AcceptPolicy, FailedFile, FileAck, FileSummary, SessionTracker, TransferableFile,
    WireMessage, DEFAULT_CHUNK_SIZE,
};
use crate::transport::{Connection, TransportError};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

/// 发送进度回调
pub trait SendProgressCallback: Send + Sync {
    /// 状态更新
    fn on_status(&self, status: &str);
    /// 需要展示给用户的提示
    fn on_notice(&self, notice: &Notice);
    /// 单个文件的所有分块已发出
    fn on_file_sent(&self, file: &FileSendReport);
    /// 接收端确认收到文件
    fn on_acked(&self, file_name: &str);
    /// 发送结束
    fn on_complete(&self, report: &SendReport);
}

/// 发送选项
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub chunk_size: usize,
    pub accept_policy: AcceptPolicy,
    pub ack_mode: AckMode,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            accept_policy: AcceptPolicy::default(),
            ack_mode: AckMode::default(),
        }
    }
}

impl SendOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            accept_policy: settings.accept_policy(),
            ack_mode: settings.ack_mode,
        }
    }
}

/// 一次发送会话的结果
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReport {
    #[serde(skip)]
    pub sent: Vec<FileSendReport>,
    /// 已被接收端确认的文件名
    pub acked: Vec<String>,
    pub skipped: Vec<FileSummary>,
    pub failed: Vec<FailedFile>,
    #[serde(skip)]
    pub notices: Vec<Notice>,
    /// 在发送 `finished` 之前连接已关闭
    pub session_closed_early: bool,
}

impl SendReport {
    /// 所有已发送的文件都被确认
    pub fn all_acked(&self) -> bool {
        self.sent.len() == self.acked.len()
    }
}

/// 发送端工作流
pub struct Sender {
    options: SendOptions,
    encoder: ChunkEncoder,
    tracker: SessionTracker,
}

impl Sender {
    pub fn new(options: SendOptions) -> Self {
        Self {
            encoder: ChunkEncoder::new(options.chunk_size),
            options,
            tracker: SessionTracker::new(),
        }
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// 通过已打开的连接发送文件
    pub async fn send_over<C: SendProgressCallback>(
        &mut self,
        conn: &mut Connection,
        files: &[TransferableFile],
        callback: &C,
    ) -> anyhow::Result<SendReport> {
        if !conn.is_open() {
            anyhow::bail!("Connection to {} is not open", conn.remote_id());
        }

        self.tracker.open(conn.remote_id());
        callback.on_status(&format!("已连接到 {}", conn.remote_id()));

        for file in files
            .iter()
            .filter(|f| self.options.accept_policy.accepts(&f.mime_type))
        {
            self.tracker.add_outgoing(file.summary());
        }

        let mut report = SendReport::default();
        let open = match self.options.ack_mode {
            AckMode::PerFile => self.send_each(conn, files, &mut report, callback).await,
            AckMode::Deferred => self.send_all(conn, files, &mut report, callback).await,
        };

        if open {
            match send_message(conn, WireMessage::SessionEnd).await {
                Ok(()) => {
                    info!("Session finished, {} file(s) sent", report.sent.len());
                    callback.on_status("✅ 所有文件已发送");
                }
                Err(e) => {
                    warn!("Failed to send session end: {}", e);
                    report.session_closed_early = true;
                }
            }
        } else {
            report.session_closed_early = true;
        }

        if report.session_closed_early {
            let notice = Notice::error("连接已断开");
            callback.on_notice(&notice);
            report.notices.push(notice);
        }

        self.tracker.close();
        callback.on_complete(&report);
        Ok(report)
    }

    /// 逐个发送，每个文件等待确认后再发下一个。返回连接是否仍然可用
    async fn send_each<C: SendProgressCallback>(
        &mut self,
        conn: &mut Connection,
        files: &[TransferableFile],
        report: &mut SendReport,
        callback: &C,
    ) -> bool {
        for file in files {
            if !conn.is_open() {
                return false;
            }

            if !self.options.accept_policy.accepts(&file.mime_type) {
                warn!("Skipping {}: unsupported type {}", file.name, file.mime_type);
                let notice = Notice::warn(format!("不支持的文件类型，文件名: {}", file.name));
                callback.on_notice(&notice);
                report.notices.push(notice);
                report.skipped.push(file.summary());
                continue;
            }

            callback.on_status(&format!("正在发送 {}", file.name));
            match self.encoder.send_file(conn.sink.as_mut(), file).await {
                Ok(sent) => {
                    callback.on_file_sent(&sent);
                    let mut pending = vec![sent.clone()];
                    report.sent.push(sent);
                    if !self.await_acks(conn, &mut pending, report, callback).await {
                        return false;
                    }
                }
                Err(e) => {
                    warn!("Failed to send {}: {}", file.name, e);
                    let notice = Notice::error(format!("发送 {} 失败: {}", file.name, e));
                    callback.on_notice(&notice);
                    report.notices.push(notice);
                    report.failed.push(FailedFile {
                        name: file.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        conn.is_open()
    }

    /// 先发完全部文件再收集确认。返回连接是否仍然可用
    async fn send_all<C: SendProgressCallback>(
        &mut self,
        conn: &mut Connection,
        files: &[TransferableFile],
        report: &mut SendReport,
        callback: &C,
    ) -> bool {
        callback.on_status(&format!("正在发送 {} 个文件", files.len()));
        let batch = self
            .encoder
            .send_batch(conn.sink.as_mut(), files, &self.options.accept_policy)
            .await;

        for notice in &batch.notices {
            callback.on_notice(notice);
        }
        for sent in &batch.sent {
            callback.on_file_sent(sent);
        }

        let mut pending = batch.sent.clone();
        report.sent = batch.sent;
        report.skipped = batch.skipped;
        report.failed = batch.failed;
        report.notices = batch.notices;

        self.await_acks(conn, &mut pending, report, callback).await
    }

    /// 等待直到 `pending` 中的文件都被确认。返回连接是否仍然可用
    async fn await_acks<C: SendProgressCallback>(
        &mut self,
        conn: &mut Connection,
        pending: &mut Vec<FileSendReport>,
        report: &mut SendReport,
        callback: &C,
    ) -> bool {
        while !pending.is_empty() {
            let ack = match next_ack(conn).await {
                Ok(Some(ack)) => ack,
                Ok(None) => {
                    debug!("Connection closed with {} file(s) unacknowledged", pending.len());
                    return false;
                }
                Err(e) => {
                    warn!("Connection error while waiting for ack: {}", e);
                    return false;
                }
            };

            let Some(index) = pending.iter().position(|sent| ack_matches(&ack, sent)) else {
                warn!("Ack for unknown file {}, ignored", ack.name);
                continue;
            };

            let sent = pending.remove(index);
            debug!("{} acknowledged by receiver", sent.name);
            self.tracker.record_outgoing_ack(&sent.name);
            callback.on_acked(&sent.name);
            report.acked.push(sent.name);
        }
        true
    }
}

async fn send_message(conn: &mut Connection, message: WireMessage) -> anyhow::Result<()> {
    conn.sink.send(message.into_frame()?).await?;
    Ok(())
}

/// 读到下一条确认；`None` 表示连接已关闭
async fn next_ack(conn: &mut Connection) -> Result<Option<FileAck>, TransportError> {
    while let Some(frame) = conn.source.recv().await {
        match WireMessage::parse(frame?) {
            Ok(WireMessage::Ack(ack)) => return Ok(Some(ack)),
            Ok(other) => debug!("Ignoring {:?} while waiting for ack", other),
            Err(e) => warn!("Invalid message from receiver: {}", e),
        }
    }
    Ok(None)
}

/// 有 UUID 时按 UUID 匹配，否则按文件名
fn ack_matches(ack: &FileAck, sent: &FileSendReport) -> bool {
    match &ack.uuid {
        Some(uuid) => *uuid == sent.id.to_string(),
        None => ack.name == sent.name,
    }
}

/// 简化的发送回调实现
pub struct SimpleSendCallback {
    tx: mpsc::Sender<SendEvent>,
}

#[derive(Debug, Clone)]
pub enum SendEvent {
    Status(String),
    Notice(Notice),
    FileSent { name: String, bytes: u64 },
    Acked(String),
    Complete { sent: usize, acked: usize },
}

impl SimpleSendCallback {
    pub fn new() -> (Self, mpsc::Receiver<SendEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (Self { tx }, rx)
    }
}

impl SendProgressCallback for SimpleSendCallback {
    fn on_status(&self, status: &str) {
        let _ = self.tx.try_send(SendEvent::Status(status.to_string()));
    }

    fn on_notice(&self, notice: &Notice) {
        let _ = self.tx.try_send(SendEvent::Notice(notice.clone()));
    }

    fn on_file_sent(&self, file: &FileSendReport) {
        let _ = self.tx.try_send(SendEvent::FileSent {
            name: file.name.clone(),
            bytes: file.bytes_sent,
        });
    }

    fn on_acked(&self, file_name: &str) {
        let _ = self.tx.try_send(SendEvent::Acked(file_name.to_string()));
    }

    fn on_complete(&self, report: &SendReport) {
        let _ = self.tx.try_send(SendEvent::Complete {
            sent: report.sent.len(),
            acked: report.acked.len(),
        });
    }
}
