//! 接收端工作流
//!
//! 高层 API 封装完整的接收流程:
//! 1. 从连接读取消息并交给分块解码器
//! 2. 保存完成的文件并回复确认
//! 3. 收到 `finished` 或连接关闭时结束
//!
//! 连接中途关闭时，正在接收的文件被放弃，以最后的进度列入未完成列表。

use crate::config::AppSettings;
use crate::notice::Notice;
use crate::transfer::{
    ChunkDecoder, DecodeError, DecodeOutcome, DecoderOptions, FailedFile, FileAck, FileSink,
    FileSummary, ReceivedFile, SessionTracker, WireMessage, format_bytes,
};
use crate::transport::Connection;
use log::{debug, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// 接收进度回调
pub trait ReceiveProgressCallback: Send + Sync {
    /// 状态更新
    fn on_status(&self, status: &str);
    /// 需要展示给用户的提示
    fn on_notice(&self, notice: &Notice);
    /// 开始接收新文件
    fn on_file_started(&self, file: &FileSummary);
    /// 进度更新（只在数值变化时调用）
    fn on_progress(&self, file_name: &str, percent: u8);
    /// 文件已保存
    fn on_file_saved(&self, file: &SavedFile);
    /// 接收结束
    fn on_complete(&self, report: &ReceiveReport);
}

/// 接收选项
#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    /// 大小与声明不符时丢弃文件
    pub strict_size: bool,
}

impl ReceiveOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            strict_size: settings.strict_size,
        }
    }
}

/// 已保存的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// 实际大小与声明不符
    pub size_mismatch: bool,
}

/// 未接收完整的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompleteFile {
    pub name: String,
    pub percent: u8,
}

/// 一次接收会话的结果
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveReport {
    pub saved: Vec<SavedFile>,
    pub incomplete: Vec<IncompleteFile>,
    pub failed: Vec<FailedFile>,
    #[serde(skip)]
    pub notices: Vec<Notice>,
    /// 发送端发出了 `finished`
    pub session_finished: bool,
}

/// 接收端工作流
pub struct Receiver {
    options: ReceiveOptions,
    tracker: SessionTracker,
}

impl Receiver {
    pub fn new(options: ReceiveOptions) -> Self {
        Self {
            options,
            tracker: SessionTracker::new(),
        }
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// 从已打开的连接接收文件，直到会话结束或连接关闭
    pub async fn receive_over<C: ReceiveProgressCallback>(
        &mut self,
        conn: &mut Connection,
        sink: &mut dyn FileSink,
        callback: &C,
    ) -> anyhow::Result<ReceiveReport> {
        self.tracker.open(conn.remote_id());
        callback.on_status(&format!("已连接到 {}，等待文件...", conn.remote_id()));

        let mut decoder = ChunkDecoder::new(DecoderOptions {
            strict_size: self.options.strict_size,
        });
        let mut report = ReceiveReport::default();

        while let Some(item) = conn.source.recv().await {
            let frame = match item {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Connection error: {}", e);
                    push_notice(&mut report, callback, Notice::error(format!("连接错误: {e}")));
                    break;
                }
            };

            let message = match WireMessage::parse(frame) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Skipping invalid message: {}", e);
                    continue;
                }
            };

            let outcomes = match decoder.dispatch(message) {
                Ok(outcomes) => outcomes,
                Err(DecodeError::SizeMismatch {
                    name,
                    uuid,
                    declared,
                    received,
                }) => {
                    warn!("Discarding {name}: declared {declared} bytes, received {received}");
                    push_notice(
                        &mut report,
                        callback,
                        Notice::error(format!("{name} 大小不符，已丢弃")),
                    );
                    report.failed.push(FailedFile {
                        name: name.clone(),
                        reason: format!("declared {declared} bytes, received {received}"),
                    });
                    // 仍然确认，发送端不会因此一直等待
                    send_ack(conn, FileAck { name, uuid }).await;
                    continue;
                }
            };

            for outcome in outcomes {
                if self
                    .handle(outcome, conn, sink, &mut report, callback)
                    .await
                {
                    report.session_finished = true;
                }
            }
            if report.session_finished {
                break;
            }
        }

        if let Some((name, percent)) = decoder.abandon() {
            warn!("Connection closed while receiving {name} ({percent}%)");
            report.incomplete.push(IncompleteFile { name, percent });
        }

        if report.session_finished {
            info!("Session finished, {} file(s) saved", report.saved.len());
            callback.on_status("✅ 所有文件已接收");
        } else {
            push_notice(&mut report, callback, Notice::error("连接已断开"));
        }

        self.tracker.close();
        callback.on_complete(&report);
        Ok(report)
    }

    /// 处理一个解码事件，返回是否收到会话结束
    async fn handle<C: ReceiveProgressCallback>(
        &mut self,
        outcome: DecodeOutcome,
        conn: &mut Connection,
        sink: &mut dyn FileSink,
        report: &mut ReceiveReport,
        callback: &C,
    ) -> bool {
        match outcome {
            DecodeOutcome::Started(summary) => {
                callback.on_status(&format!(
                    "正在接收 {} ({})",
                    summary.name,
                    format_bytes(summary.size)
                ));
                self.tracker.record_incoming_progress(&summary.name, 0);
                callback.on_file_started(&summary);
                self.tracker.add_incoming(summary);
            }
            DecodeOutcome::Progress { name, percent } => {
                if self.tracker.incoming_progress(&name) != Some(percent) {
                    self.tracker.record_incoming_progress(&name, percent);
                    callback.on_progress(&name, percent);
                }
            }
            DecodeOutcome::Completed(file) => {
                self.persist(&file, sink, report, callback).await;
                send_ack(conn, file.ack()).await;
            }
            DecodeOutcome::Abandoned { name, percent } => {
                push_notice(
                    report,
                    callback,
                    Notice::warn(format!("{name} 未接收完整，已放弃")),
                );
                report.incomplete.push(IncompleteFile { name, percent });
            }
            DecodeOutcome::SessionEnd => return true,
            DecodeOutcome::Ack(ack) => debug!("Ignoring ack for {} on receiver side", ack.name),
            DecodeOutcome::Ignored(reason) => debug!("Ignored message: {reason}"),
        }
        false
    }

    async fn persist<C: ReceiveProgressCallback>(
        &mut self,
        file: &ReceivedFile,
        sink: &mut dyn FileSink,
        report: &mut ReceiveReport,
        callback: &C,
    ) {
        if file.size_mismatch() {
            push_notice(
                report,
                callback,
                Notice::warn(format!(
                    "{} 大小与声明不符 ({} / {})",
                    file.name,
                    format_bytes(file.len()),
                    format_bytes(file.declared_size)
                )),
            );
        }

        match sink.save(file).await {
            Ok(path) => {
                let saved = SavedFile {
                    name: file.name.clone(),
                    path,
                    size: file.len(),
                    size_mismatch: file.size_mismatch(),
                };
                callback.on_file_saved(&saved);
                report.saved.push(saved);
            }
            Err(e) => {
                warn!("Failed to save {}: {}", file.name, e);
                push_notice(
                    report,
                    callback,
                    Notice::error(format!("保存 {} 失败: {}", file.name, e)),
                );
                report.failed.push(FailedFile {
                    name: file.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

fn push_notice<C: ReceiveProgressCallback>(
    report: &mut ReceiveReport,
    callback: &C,
    notice: Notice,
) {
    callback.on_notice(&notice);
    report.notices.push(notice);
}

/// 发送确认，失败只记录日志（连接关闭会在下一次读取时发现）
async fn send_ack(conn: &mut Connection, ack: FileAck) {
    let name = ack.name.clone();
    let frame = match WireMessage::Ack(ack).into_frame() {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Failed to encode ack for {}: {}", name, e);
            return;
        }
    };
    if let Err(e) = conn.sink.send(frame).await {
        warn!("Failed to send ack for {}: {}", name, e);
    }
}

/// 简化的接收回调实现
pub struct SimpleReceiveCallback {
    tx: mpsc::Sender<ReceiveEvent>,
}

#[derive(Debug, Clone)]
pub enum ReceiveEvent {
    Status(String),
    Notice(Notice),
    Started(FileSummary),
    Progress { name: String, percent: u8 },
    Saved(SavedFile),
    Complete { saved: usize, incomplete: usize },
}

impl SimpleReceiveCallback {
    pub fn new() -> (Self, mpsc::Receiver<ReceiveEvent>) {
        let (tx, rx) = mpsc::channel(256);
        (Self { tx }, rx)
    }
}

impl ReceiveProgressCallback for SimpleReceiveCallback {
    fn on_status(&self, status: &str) {
        let _ = self.tx.try_send(ReceiveEvent::Status(status.to_string()));
    }

    fn on_notice(&self, notice: &Notice) {
        let _ = self.tx.try_send(ReceiveEvent::Notice(notice.clone()));
    }

    fn on_file_started(&self, file: &FileSummary) {
        let _ = self.tx.try_send(ReceiveEvent::Started(file.clone()));
    }

    fn on_progress(&self, file_name: &str, percent: u8) {
        let _ = self.tx.try_send(ReceiveEvent::Progress {
            name: file_name.to_string(),
            percent,
        });
    }

    fn on_file_saved(&self, file: &SavedFile) {
        let _ = self.tx.try_send(ReceiveEvent::Saved(file.clone()));
    }

    fn on_complete(&self, report: &ReceiveReport) {
        let _ = self.tx.try_send(ReceiveEvent::Complete {
            saved: report.saved.len(),
            incomplete: report.incomplete.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{FileMetadata, MemoryFileSink};
    use crate::transport::{Frame, memory};

    async fn send(conn: &mut Connection, message: WireMessage) {
        conn.sink.send(message.into_frame().unwrap()).await.unwrap();
    }

    fn progress_events(rx: &mut mpsc::Receiver<ReceiveEvent>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ReceiveEvent::Progress { percent, .. } = event {
                out.push(percent);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_close_mid_file_is_not_saved() {
        let (mut sender, mut conn) = memory::pair("sender", "receiver");

        send(
            &mut sender,
            WireMessage::Metadata(FileMetadata::new("cat.png", 150 * 1024)),
        )
        .await;
        send(&mut sender, WireMessage::Chunk(vec![0u8; 64 * 1024])).await;
        sender.close().await.unwrap();

        let (callback, mut rx) = SimpleReceiveCallback::new();
        let mut sink = MemoryFileSink::default();
        let mut receiver = Receiver::new(ReceiveOptions::default());
        let report = receiver
            .receive_over(&mut conn, &mut sink, &callback)
            .await
            .unwrap();

        assert!(sink.files.is_empty());
        assert!(report.saved.is_empty());
        assert!(!report.session_finished);
        assert_eq!(
            report.incomplete,
            vec![IncompleteFile {
                name: "cat.png".into(),
                percent: 43
            }]
        );
        assert_eq!(receiver.tracker().incoming_progress("cat.png"), Some(43));
        assert_eq!(progress_events(&mut rx), vec![43]);
    }

    #[tokio::test]
    async fn test_acks_each_completed_file() {
        let (mut sender, mut conn) = memory::pair("sender", "receiver");

        let metadata = FileMetadata {
            uuid: Some("u-1".into()),
            ..FileMetadata::new("a.png", 3)
        };
        send(&mut sender, WireMessage::Metadata(metadata)).await;
        send(&mut sender, WireMessage::Chunk(vec![1, 2, 3])).await;
        send(&mut sender, WireMessage::Terminal).await;
        send(&mut sender, WireMessage::SessionEnd).await;

        let (callback, _rx) = SimpleReceiveCallback::new();
        let mut sink = MemoryFileSink::default();
        let mut receiver = Receiver::new(ReceiveOptions::default());
        let report = receiver
            .receive_over(&mut conn, &mut sink, &callback)
            .await
            .unwrap();

        assert!(report.session_finished);
        assert_eq!(report.saved.len(), 1);
        assert_eq!(sink.files[0].payload, vec![1, 2, 3]);

        let ack = sender.source.recv().await.unwrap().unwrap();
        assert_eq!(
            WireMessage::parse(ack).unwrap(),
            WireMessage::Ack(FileAck {
                name: "a.png".into(),
                uuid: Some("u-1".into()),
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_messages_are_skipped() {
        let (mut sender, mut conn) = memory::pair("sender", "receiver");

        sender.sink.send(Frame::Text("hello".into())).await.unwrap();
        send(&mut sender, WireMessage::Chunk(vec![9])).await;
        send(&mut sender, WireMessage::Metadata(FileMetadata::new("b.png", 0))).await;
        send(&mut sender, WireMessage::Terminal).await;
        send(&mut sender, WireMessage::SessionEnd).await;

        let (callback, mut rx) = SimpleReceiveCallback::new();
        let mut sink = MemoryFileSink::default();
        let mut receiver = Receiver::new(ReceiveOptions::default());
        let report = receiver
            .receive_over(&mut conn, &mut sink, &callback)
            .await
            .unwrap();

        assert!(report.session_finished);
        assert_eq!(report.saved.len(), 1);
        assert!(sink.files[0].is_empty());
        assert_eq!(progress_events(&mut rx), vec![100]);
    }

    #[tokio::test]
    async fn test_strict_size_discards_and_acks() {
        let (mut sender, mut conn) = memory::pair("sender", "receiver");

        // 同名文件靠 uuid 区分，确认必须带回原 uuid
        let mut metadata = FileMetadata::new("s.png", 10);
        metadata.uuid = Some("u-1".into());
        send(&mut sender, WireMessage::Metadata(metadata)).await;
        send(&mut sender, WireMessage::Chunk(vec![0u8; 4])).await;
        send(&mut sender, WireMessage::Terminal).await;
        send(&mut sender, WireMessage::SessionEnd).await;

        let (callback, _rx) = SimpleReceiveCallback::new();
        let mut sink = MemoryFileSink::default();
        let mut receiver = Receiver::new(ReceiveOptions { strict_size: true });
        let report = receiver
            .receive_over(&mut conn, &mut sink, &callback)
            .await
            .unwrap();

        assert!(sink.files.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            WireMessage::parse(sender.source.recv().await.unwrap().unwrap()),
            Ok(WireMessage::Ack(FileAck { ref name, uuid: Some(ref uuid) }))
                if name == "s.png" && uuid == "u-1"
        ));
    }
}
