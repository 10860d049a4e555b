//! 文件传输模块
//!
//! 包含:
//! - 数据通道消息格式
//! - 分块发送 (encoder) 与分块接收状态机 (decoder)
//! - 会话进度跟踪
//! - 接收文件的本地保存

pub mod decoder;
pub mod encoder;
pub mod file;
pub mod persist;
pub mod protocol;
pub mod tracker;

pub use decoder::{
    ChunkDecoder, DecodeError, DecodeOutcome, DecoderOptions, DecoderState, ReceivedFile,
};
pub use encoder::{BatchReport, ChunkEncoder, FileSendReport, DEFAULT_CHUNK_SIZE};
pub use file::{format_bytes, AcceptPolicy, FilePayload, TransferableFile};
pub use persist::{DownloadDir, FileSink, MemoryFileSink, PersistError};
pub use protocol::{FileAck, FileMetadata, ProtocolError, WireMessage};
pub use tracker::{FileProgress, SessionTracker, TrackerSnapshot};

use crate::transport::TransportError;
use serde::{Deserialize, Serialize};

/// 文件信息（进度展示与报告用）
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: Option<String>,
    pub name: String,
    pub size: u64,
    pub mime_type: Option<String>,
}

/// 未能完成的文件及原因
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{name} ended after {read} of {declared} bytes")]
    Truncated {
        name: String,
        read: u64,
        declared: u64,
    },
}
