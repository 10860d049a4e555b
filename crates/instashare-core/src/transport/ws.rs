//! WebSocket 直连传输
//!
//! - 发送端: [`WsHost`] 监听端口并生成会话 ID，握手时校验 `token` 查询参数
//! - 接收端: [`connect`] 按分享链接直接连到发送端
//!
//! 文本帧承载控制消息，二进制帧承载文件分块。TCP 保证顺序和可靠送达。

use log::{debug, info, warn};

use super::{Connection, Frame, FrameSink, FrameSource, TransportError};
use crate::link::{ConnectionToken, LinkError, ShareLink, TOKEN_PARAM};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};

/// 单个 TCP 连接完成 WebSocket 握手的期限
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// 发送端监听器
///
/// 一个会话只接受一条连接，令牌不匹配或握手超时的连接被丢弃后继续等待。
pub struct WsHost {
    listener: TcpListener,
    token: ConnectionToken,
    handshake_timeout: Duration,
}

impl WsHost {
    /// 绑定地址并生成新的会话 ID
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        Self::bind_with_token(addr, ConnectionToken::generate()).await
    }

    pub async fn bind_with_token(
        addr: &str,
        token: ConnectionToken,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "Session {} listening on {}",
            token,
            listener.local_addr()?
        );
        Ok(Self {
            listener,
            token,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        })
    }

    /// 修改握手期限
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// 会话 ID
    pub fn session_id(&self) -> &str {
        self.token.as_str()
    }

    pub fn token(&self) -> &ConnectionToken {
        &self.token
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// 以对外可达的主机名构造分享链接
    pub fn share_link(&self, public_host: &str) -> Result<ShareLink, LinkError> {
        let port = self
            .listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or_default();
        ShareLink::new(&format!("{public_host}:{port}"), self.token.clone())
    }

    /// 等待持有正确令牌的对端连入
    pub async fn accept(&self) -> Result<Connection, TransportError> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("TCP connection from {}", peer);

            let expected = self.token.as_str();
            let handshake = tokio_tungstenite::accept_hdr_async(
                stream,
                |request: &Request, response: Response| verify_token(request, response, expected),
            );

            // 不发请求的连接不能占住监听器
            match tokio::time::timeout(self.handshake_timeout, handshake).await {
                Ok(Ok(ws_stream)) => {
                    info!("Peer {} connected to session {}", peer, self.token);
                    return Ok(split_connection(peer.to_string(), ws_stream));
                }
                Ok(Err(e)) => {
                    warn!("Rejected handshake from {}: {}", peer, e);
                }
                Err(_) => {
                    warn!(
                        "Handshake from {} timed out after {:?}",
                        peer, self.handshake_timeout
                    );
                }
            }
        }
    }
}

/// 校验握手请求中的 token 参数
fn verify_token(
    request: &Request,
    response: Response,
    expected: &str,
) -> Result<Response, ErrorResponse> {
    let presented = request.uri().query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == TOKEN_PARAM)
            .map(|(_, value)| value.into_owned())
    });

    if presented.as_deref() == Some(expected) {
        Ok(response)
    } else {
        let mut rejection = ErrorResponse::new(Some("invalid session token".to_string()));
        *rejection.status_mut() = StatusCode::UNAUTHORIZED;
        Err(rejection)
    }
}

/// 按分享链接连接发送端
pub async fn connect(link: &ShareLink) -> Result<Connection, TransportError> {
    let ws_url = link.ws_url();
    info!("Connecting to {}", ws_url);

    let (ws_stream, _) = match tokio_tungstenite::connect_async(ws_url.as_str()).await {
        Ok(connected) => connected,
        Err(tungstenite::Error::Http(response)) => {
            return Err(TransportError::Rejected(format!(
                "HTTP {}",
                response.status()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    let remote = link
        .base()
        .host_str()
        .map(|host| match link.base().port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
        .unwrap_or_else(|| link.base().to_string());

    Ok(split_connection(remote, ws_stream))
}

fn split_connection<S>(remote_id: String, ws_stream: WebSocketStream<S>) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws_stream.split();
    Connection::new(
        remote_id,
        Box::new(WsSink {
            inner: write,
            open: true,
        }),
        Box::new(WsSource { inner: read }),
    )
}

struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
    open: bool,
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }

        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
        };

        if let Err(e) = self.inner.send(message).await {
            self.open = false;
            return Err(e.into());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        match self.inner.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

struct WsSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameSource for WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text))),
                Message::Binary(data) => return Some(Ok(Frame::Binary(data))),
                Message::Close(_) => return None,
                // Ping/Pong 由 tungstenite 自动处理
                _ => continue,
            }
        }
    }
}
