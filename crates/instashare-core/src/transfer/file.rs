//! 待发送文件
//!
//! 选择文件时即分配 UUID 并确定声明大小，传输过程中两者都不再改变。

use super::FileSummary;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// 未知类型时使用的 MIME
pub const FALLBACK_MIME: &str = "application/octet-stream";

/// 文件内容来源
#[derive(Debug, Clone)]
pub enum FilePayload {
    /// 已在内存中的内容
    Memory(Arc<[u8]>),
    /// 发送时按片读取的磁盘文件
    Disk(PathBuf),
}

/// 一个已选择、可发送的文件
#[derive(Debug, Clone)]
pub struct TransferableFile {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub payload: FilePayload,
}

impl TransferableFile {
    /// 从磁盘文件创建，大小取自当前元数据
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            id: Uuid::new_v4(),
            mime_type: guess_mime(&name),
            name,
            size: metadata.len(),
            payload: FilePayload::Disk(path.to_path_buf()),
        })
    }

    /// 从内存内容创建，未给出 MIME 时按文件名猜测
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: Option<&str>,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        let name = name.into();
        let data = data.into();
        Self {
            id: Uuid::new_v4(),
            mime_type: mime_type.map_or_else(|| guess_mime(&name), str::to_string),
            size: data.len() as u64,
            name,
            payload: FilePayload::Memory(data),
        }
    }

    pub fn summary(&self) -> FileSummary {
        FileSummary {
            id: Some(self.id.to_string()),
            name: self.name.clone(),
            size: self.size,
            mime_type: Some(self.mime_type.clone()),
        }
    }
}

/// 按扩展名猜测 MIME 类型
pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

/// 允许发送的文件类型
///
/// 按 MIME 前缀匹配，前缀列表为空表示不限制。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptPolicy {
    prefixes: Vec<String>,
}

impl AcceptPolicy {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// 不限制类型
    pub fn any() -> Self {
        Self {
            prefixes: Vec::new(),
        }
    }

    /// 仅图片和视频
    pub fn media_only() -> Self {
        Self::new(["image/", "video/"])
    }

    pub fn accepts(&self, mime_type: &str) -> bool {
        self.prefixes.is_empty()
            || self
                .prefixes
                .iter()
                .any(|prefix| mime_type.starts_with(prefix.as_str()))
    }
}

impl Default for AcceptPolicy {
    fn default() -> Self {
        Self::media_only()
    }
}

/// 人类可读的字节数，例如 `1.5 KB`
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Byte".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{value:.2}");
    let formatted = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{formatted} {}", UNITS[unit])
}
