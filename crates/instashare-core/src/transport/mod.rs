//! 点对点传输层
//!
//! 核心逻辑只依赖两个 trait：
//! - [`FrameSink`]: 按顺序发送帧
//! - [`FrameSource`]: 按顺序接收帧，`None` 表示连接已关闭
//!
//! 分块协议没有序列号，要求传输层保证有序、可靠、整帧送达。
//! 这里提供的两种实现（进程内 mpsc 和 TCP 上的 WebSocket）都满足该要求。

pub mod memory;
pub mod ws;

use async_trait::async_trait;

/// 传输层的最小消息单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// 帧的载荷长度（字节）
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 传输层错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Handshake rejected: {0}")]
    Rejected(String),
}

/// 发送半边
#[async_trait]
pub trait FrameSink: Send {
    /// 发送一帧，返回时该帧已交给底层传输
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// 连接是否仍可发送
    fn is_open(&self) -> bool;

    /// 主动关闭发送方向，对端的 [`FrameSource::recv`] 随后返回 `None`
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// 接收半边
#[async_trait]
pub trait FrameSource: Send {
    /// 等待下一帧
    ///
    /// - `Some(Ok(frame))`: 收到数据
    /// - `Some(Err(e))`: 连接出错
    /// - `None`: 连接已关闭
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// 一条已打开的点对点连接
///
/// 由创建者显式持有并传入发送/接收工作流，关闭后即失效。
pub struct Connection {
    remote_id: String,
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Connection {
    pub fn new(
        remote_id: impl Into<String>,
        sink: Box<dyn FrameSink>,
        source: Box<dyn FrameSource>,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            sink,
            source,
        }
    }

    /// 对端标识（WebSocket 下为对端地址）
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_open()
    }

    /// 关闭连接
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_id", &self.remote_id)
            .field("open", &self.sink.is_open())
            .finish_non_exhaustive()
    }
}
