//! 工作流模块
//!
//! 提供高层 API 封装完整的发送/接收流程。连接由调用方建立并显式传入。

pub mod receiver;
pub mod sender;

pub use receiver::{
    IncompleteFile, ReceiveEvent, ReceiveOptions, ReceiveProgressCallback, ReceiveReport,
    Receiver, SavedFile, SimpleReceiveCallback,
};
pub use sender::{
    SendEvent, SendOptions, SendProgressCallback, SendReport, Sender, SimpleSendCallback,
};
