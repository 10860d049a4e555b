//! 进程内传输
//!
//! 基于 tokio mpsc 的一对连接，用于测试和嵌入场景。
//! 通道有界，发送端在对端处理不过来时会被挂起。

use super::{Connection, Frame, FrameSink, FrameSource, TransportError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// 默认通道容量（帧）
pub const DEFAULT_CAPACITY: usize = 64;

struct MemorySink {
    tx: Option<mpsc::Sender<Frame>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // 丢弃发送端后，对端 recv 在读完缓冲后返回 None
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::Receiver<Frame>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// 创建一对互联的连接
///
/// 第一个连接属于 `a_id` 一方（其 `remote_id` 为 `b_id`），第二个连接属于 `b_id` 一方。
pub fn pair(a_id: &str, b_id: &str) -> (Connection, Connection) {
    pair_with_capacity(a_id, b_id, DEFAULT_CAPACITY)
}

pub fn pair_with_capacity(a_id: &str, b_id: &str, capacity: usize) -> (Connection, Connection) {
    let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, a_rx) = mpsc::channel(capacity.max(1));

    let a = Connection::new(
        b_id,
        Box::new(MemorySink { tx: Some(a_tx) }),
        Box::new(MemorySource { rx: a_rx }),
    );
    let b = Connection::new(
        a_id,
        Box::new(MemorySink { tx: Some(b_tx) }),
        Box::new(MemorySource { rx: b_rx }),
    );

    (a, b)
}
