//! 分享链接
//!
//! 链接格式: `http://<host>:<port>/?token=<session-id>`
//!
//! - token 即发送端的会话 ID，不透明、无过期、无签名
//! - 接收端据此得到 WebSocket 地址 `ws://<host>:<port>/?token=<session-id>`

use std::fmt;
use url::Url;

/// 查询参数名
pub const TOKEN_PARAM: &str = "token";

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Link has no session token")]
    MissingToken,
}

/// 连接令牌（发送端会话 ID）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionToken(String);

impl ConnectionToken {
    /// 生成新的会话 ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 可分享的连接链接
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    base: Url,
    token: ConnectionToken,
}

impl ShareLink {
    /// 由发送端地址和令牌构造链接
    ///
    /// `base` 可以是完整 URL，也可以是 `host:port`（默认 `http://`）。
    pub fn new(base: &str, token: ConnectionToken) -> Result<Self, LinkError> {
        let base = if base.contains("://") {
            base.to_string()
        } else {
            format!("http://{base}")
        };

        let mut url = Url::parse(&base)?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(LinkError::UnsupportedScheme(other.to_string())),
        }
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self { base: url, token })
    }

    /// 解析接收端拿到的链接
    ///
    /// 同时接受 `ws://` / `wss://` 形式，统一归一化为 HTTP(S) 基地址。
    pub fn parse(link: &str) -> Result<Self, LinkError> {
        let mut url = Url::parse(link.trim())?;

        let token = url
            .query_pairs()
            .find(|(key, _)| key == TOKEN_PARAM)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .ok_or(LinkError::MissingToken)?;

        let http_scheme = match url.scheme() {
            "http" | "ws" => "http",
            "https" | "wss" => "https",
            other => return Err(LinkError::UnsupportedScheme(other.to_string())),
        };
        // http/https/ws/wss 之间切换总是合法的
        let _ = url.set_scheme(http_scheme);
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self {
            base: url,
            token: ConnectionToken(token),
        })
    }

    pub fn token(&self) -> &ConnectionToken {
        &self.token
    }

    /// 发送端地址（不含查询参数）
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// 完整的分享 URL
    pub fn to_url(&self) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair(TOKEN_PARAM, self.token.as_str());
        url
    }

    /// 接收端应连接的 WebSocket 地址
    pub fn ws_url(&self) -> Url {
        let mut url = self.to_url();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        let _ = url.set_scheme(scheme);
        url
    }
}

impl fmt::Display for ShareLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

impl std::str::FromStr for ShareLink {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_from_host_port() {
        let link = ShareLink::new("192.168.1.20:8080", ConnectionToken::new("abc-123")).unwrap();
        assert_eq!(link.to_string(), "http://192.168.1.20:8080/?token=abc-123");
        assert_eq!(
            link.ws_url().as_str(),
            "ws://192.168.1.20:8080/?token=abc-123"
        );
    }

    #[test]
    fn test_build_drops_existing_query() {
        let link =
            ShareLink::new("https://share.example/?token=old#x", ConnectionToken::new("new"))
                .unwrap();
        assert_eq!(link.to_string(), "https://share.example/?token=new");
        assert_eq!(link.ws_url().scheme(), "wss");
    }

    #[test]
    fn test_parse_roundtrip() {
        let token = ConnectionToken::generate();
        let link = ShareLink::new("host.local:9000", token.clone()).unwrap();

        let parsed = ShareLink::parse(&link.to_string()).unwrap();
        assert_eq!(parsed.token(), &token);
        assert_eq!(parsed, link);
    }

    #[test]
    fn test_parse_ws_link() {
        let parsed = ShareLink::parse("ws://10.0.0.2:7000/?token=t1").unwrap();
        assert_eq!(parsed.base().scheme(), "http");
        assert_eq!(parsed.token().as_str(), "t1");
    }

    #[test]
    fn test_parse_ignores_other_params() {
        let parsed = ShareLink::parse("http://h:1/?name=alice&token=t2").unwrap();
        assert_eq!(parsed.token().as_str(), "t2");
        assert_eq!(parsed.to_string(), "http://h:1/?token=t2");
    }

    #[test]
    fn test_parse_rejects_missing_token() {
        assert!(matches!(
            ShareLink::parse("http://h:1/"),
            Err(LinkError::MissingToken)
        ));
        assert!(matches!(
            ShareLink::parse("http://h:1/?token="),
            Err(LinkError::MissingToken)
        ));
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(matches!(
            ShareLink::parse("ftp://h/?token=x"),
            Err(LinkError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            ShareLink::parse("not a url"),
            Err(LinkError::InvalidUrl(_))
        ));
    }
}
