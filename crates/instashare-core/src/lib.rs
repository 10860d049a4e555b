//! Instashare Core Library
//!
//! 点对点文件分享的核心实现库：发送端生成分享链接，接收端打开链接后直接建立连接，
//! 文件按固定大小分块经由有序消息通道传输。
//!
//! # 模块
//!
//! - **transport**: 帧收发 trait、进程内连接对、WebSocket 直连
//! - **transfer**: 消息格式、分块发送、接收状态机、进度跟踪、本地保存
//! - **link**: 分享链接与会话令牌
//! - **workflow**: 发送端/接收端完整流程
//! - **config**: 持久化设置
//! - **notice**: 用户提示
//!
//! # 使用示例
//!
//! ## 发送文件
//!
//! ```ignore
//! use instashare_core::{Sender, SendOptions, SimpleSendCallback, TransferableFile, WsHost};
//!
//! // 1. 监听端口并生成分享链接
//! let host = WsHost::bind("0.0.0.0:8080").await?;
//! println!("{}", host.share_link("192.168.1.20")?);
//!
//! // 2. 等待接收端连接
//! let mut conn = host.accept().await?;
//!
//! // 3. 发送文件
//! let files = vec![TransferableFile::from_path("cat.png").await?];
//! let (callback, _events) = SimpleSendCallback::new();
//! let report = Sender::new(SendOptions::default())
//!     .send_over(&mut conn, &files, &callback)
//!     .await?;
//! ```
//!
//! ## 接收文件
//!
//! ```ignore
//! use instashare_core::{DownloadDir, Receiver, ReceiveOptions, ShareLink, SimpleReceiveCallback};
//!
//! let link = ShareLink::parse("http://192.168.1.20:8080/?token=...")?;
//! let mut conn = instashare_core::transport::ws::connect(&link).await?;
//!
//! let mut sink = DownloadDir::new("Downloads");
//! let (callback, _events) = SimpleReceiveCallback::new();
//! let report = Receiver::new(ReceiveOptions::default())
//!     .receive_over(&mut conn, &mut sink, &callback)
//!     .await?;
//! ```

pub mod config;
pub mod link;
pub mod notice;
pub mod transfer;
pub mod transport;
pub mod workflow;

// Config re-exports
pub use config::{AckMode, AppSettings};

// Link re-exports
pub use link::{ConnectionToken, LinkError, ShareLink};

// Notice re-exports
pub use notice::{Notice, Severity};

// Transfer re-exports
pub use transfer::{
    AcceptPolicy, ChunkDecoder, ChunkEncoder, DecodeOutcome, DownloadDir, FileSink,
    SessionTracker, TransferError, TransferableFile, WireMessage,
};

// Transport re-exports
pub use transport::ws::WsHost;
pub use transport::{Connection, Frame, TransportError};

// Workflow re-exports
pub use workflow::{
    ReceiveOptions, ReceiveProgressCallback, ReceiveReport, Receiver, SendOptions,
    SendProgressCallback, SendReport, Sender, SimpleReceiveCallback, SimpleSendCallback,
};
