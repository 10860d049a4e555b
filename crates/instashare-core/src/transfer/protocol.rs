//! 数据通道消息格式
//!
//! 每个文件依次发送:
//! - 文本帧 `{"type":"file","fileName":..,"fileSize":..}`: 元数据，开始一个新文件
//! - 若干二进制帧: 文件分块，按到达顺序拼接
//! - 文本帧 `end`: 当前文件结束
//!
//! 会话级消息:
//! - 文本帧 `finished`: 本次会话不再发送文件
//! - 文本帧 `{"name":..,"uuid":..}`: 接收端确认已收到某个文件
//!
//! 分块没有序列号，正确性依赖传输层的有序送达。

use crate::transfer::file::TransferableFile;
use crate::transport::Frame;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 单个文件结束标记
pub const TERMINAL_MARKER: &str = "end";

/// 会话结束标记
pub const SESSION_END_MARKER: &str = "finished";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid control message: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unknown text message: {0}")]
    UnknownText(String),
}

/// 元数据记录的 `type` 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    File,
}

/// 文件元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub file_name: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl FileMetadata {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            kind: RecordKind::File,
            file_name: file_name.into(),
            file_size,
            file_type: None,
            uuid: None,
        }
    }
}

/// 接收确认
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAck {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// JSON 控制消息，按字段区分
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ControlRecord {
    Metadata(FileMetadata),
    Ack(FileAck),
}

/// 数据通道上的一条消息
#[derive(Clone, PartialEq, Eq)]
pub enum WireMessage {
    Metadata(FileMetadata),
    Chunk(Vec<u8>),
    Terminal,
    SessionEnd,
    Ack(FileAck),
}

impl WireMessage {
    /// 为待发送文件生成元数据消息
    pub fn metadata_for(file: &TransferableFile) -> Self {
        Self::Metadata(FileMetadata {
            kind: RecordKind::File,
            file_name: file.name.clone(),
            file_size: file.size,
            file_type: Some(file.mime_type.clone()),
            uuid: Some(file.id.to_string()),
        })
    }

    /// 从传输帧解析
    pub fn parse(frame: Frame) -> Result<Self, ProtocolError> {
        let text = match frame {
            Frame::Binary(data) => return Ok(Self::Chunk(data)),
            Frame::Text(text) => text,
        };

        match text.as_str() {
            TERMINAL_MARKER => return Ok(Self::Terminal),
            SESSION_END_MARKER => return Ok(Self::SessionEnd),
            _ => {}
        }

        if !text.trim_start().starts_with('{') {
            return Err(ProtocolError::UnknownText(text));
        }

        Ok(match serde_json::from_str(&text)? {
            ControlRecord::Metadata(metadata) => Self::Metadata(metadata),
            ControlRecord::Ack(ack) => Self::Ack(ack),
        })
    }

    /// 编码为传输帧
    pub fn into_frame(self) -> Result<Frame, ProtocolError> {
        Ok(match self {
            Self::Chunk(data) => Frame::Binary(data),
            Self::Terminal => Frame::Text(TERMINAL_MARKER.to_string()),
            Self::SessionEnd => Frame::Text(SESSION_END_MARKER.to_string()),
            Self::Metadata(metadata) => {
                Frame::Text(serde_json::to_string(&ControlRecord::Metadata(metadata))?)
            }
            Self::Ack(ack) => Frame::Text(serde_json::to_string(&ControlRecord::Ack(ack))?),
        })
    }
}

// 分块只打印长度
impl fmt::Debug for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata(metadata) => f.debug_tuple("Metadata").field(metadata).finish(),
            Self::Chunk(data) => write!(f, "Chunk({} bytes)", data.len()),
            Self::Terminal => f.write_str("Terminal"),
            Self::SessionEnd => f.write_str("SessionEnd"),
            Self::Ack(ack) => f.debug_tuple("Ack").field(ack).finish(),
        }
    }
}
