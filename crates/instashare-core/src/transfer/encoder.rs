//! 分块发送
//!
//! 每个文件: 元数据 → 定长分块（最后一块可能更短）→ `end`。
//! 分块不需要接收端确认，下一片总是在上一片发送完成后才读取。

use log::{debug, info, warn};

use super::file::{AcceptPolicy, FilePayload, TransferableFile};
use super::protocol::WireMessage;
use super::{FailedFile, FileSummary, TransferError};
use crate::notice::Notice;
use crate::transport::{Frame, FrameSink};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

/// 默认分块大小 64 KiB
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// 分块上限，低于 WebSocket 默认的单帧上限
pub const MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// 大小为 `size` 的文件会被切成几块
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size.max(1) as u64;
    size.div_ceil(chunk_size)
}

/// 单个文件的发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSendReport {
    pub id: Uuid,
    pub name: String,
    pub bytes_sent: u64,
    pub chunks_sent: u64,
}

/// 一批文件的发送结果
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub sent: Vec<FileSendReport>,
    pub skipped: Vec<FileSummary>,
    pub failed: Vec<FailedFile>,
    pub notices: Vec<Notice>,
}

/// 分块编码器
#[derive(Debug, Clone)]
pub struct ChunkEncoder {
    chunk_size: usize,
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ChunkEncoder {
    /// 分块大小会被限制在 `1..=MAX_CHUNK_SIZE`
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 发送单个文件
    ///
    /// 任一帧发送失败即停止：剩余分块和 `end` 都不会发出，接收端永远不会完成该文件。
    pub async fn send_file(
        &self,
        sink: &mut dyn FrameSink,
        file: &TransferableFile,
    ) -> Result<FileSendReport, TransferError> {
        debug!(
            "Sending {} ({} bytes, {} chunks)",
            file.name,
            file.size,
            chunk_count(file.size, self.chunk_size)
        );

        sink.send(WireMessage::metadata_for(file).into_frame()?)
            .await?;

        let mut reader = SliceReader::open(&file.payload).await?;
        let mut offset: u64 = 0;
        let mut chunks_sent: u64 = 0;

        while offset < file.size {
            let remaining = file.size - offset;
            let want =
                usize::try_from(remaining).map_or(self.chunk_size, |r| r.min(self.chunk_size));

            let slice = reader.read_slice(want).await?;
            if slice.is_empty() {
                return Err(TransferError::Truncated {
                    name: file.name.clone(),
                    read: offset,
                    declared: file.size,
                });
            }

            let len = slice.len() as u64;
            sink.send(Frame::Binary(slice)).await?;
            offset += len;
            chunks_sent += 1;
        }

        sink.send(WireMessage::Terminal.into_frame()?).await?;

        info!("Sent {} in {} chunks", file.name, chunks_sent);

        Ok(FileSendReport {
            id: file.id,
            name: file.name.clone(),
            bytes_sent: offset,
            chunks_sent,
        })
    }

    /// 按顺序发送一批文件
    ///
    /// - 通道未打开时什么也不做
    /// - 类型不被接受的文件跳过并给出警告，不影响其余文件
    /// - 单个文件失败只影响该文件；通道随之关闭时停止
    pub async fn send_batch(
        &self,
        sink: &mut dyn FrameSink,
        files: &[TransferableFile],
        policy: &AcceptPolicy,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for file in files {
            if !sink.is_open() {
                debug!("Channel not open, stop sending");
                break;
            }

            if !policy.accepts(&file.mime_type) {
                warn!("Skipping {}: unsupported type {}", file.name, file.mime_type);
                report
                    .notices
                    .push(Notice::warn(format!("不支持的文件类型，文件名: {}", file.name)));
                report.skipped.push(file.summary());
                continue;
            }

            match self.send_file(sink, file).await {
                Ok(sent) => report.sent.push(sent),
                Err(e) => {
                    warn!("Failed to send {}: {}", file.name, e);
                    report
                        .notices
                        .push(Notice::error(format!("发送 {} 失败: {}", file.name, e)));
                    report.failed.push(FailedFile {
                        name: file.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

/// 顺序读取文件内容
enum SliceReader {
    Memory { data: Arc<[u8]>, position: usize },
    Disk(tokio::fs::File),
}

impl SliceReader {
    async fn open(payload: &FilePayload) -> std::io::Result<Self> {
        Ok(match payload {
            FilePayload::Memory(data) => Self::Memory {
                data: Arc::clone(data),
                position: 0,
            },
            FilePayload::Disk(path) => Self::Disk(tokio::fs::File::open(path).await?),
        })
    }

    /// 读取至多 `want` 字节，返回空表示内容已耗尽
    async fn read_slice(&mut self, want: usize) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Memory { data, position } => {
                let end = (*position + want).min(data.len());
                let slice = data[*position..end].to_vec();
                *position = end;
                Ok(slice)
            }
            Self::Disk(file) => {
                let mut buffer = vec![0u8; want];
                let mut filled = 0;
                while filled < want {
                    let n = file.read(&mut buffer[filled..]).await?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                buffer.truncate(filled);
                Ok(buffer)
            }
        }
    }
}
