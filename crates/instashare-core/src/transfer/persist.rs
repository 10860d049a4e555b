//! 接收文件的本地保存

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::fs::{OpenOptions, create_dir_all, remove_file};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::decoder::ReceivedFile;

/// 同名文件最多尝试的编号
const MAX_NAME_ATTEMPTS: u32 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No free file name for {0}")]
    NoFreeName(String),
}

/// 保存已完成文件的目标
#[async_trait]
pub trait FileSink: Send {
    /// 保存文件，返回实际写入的位置
    async fn save(&mut self, file: &ReceivedFile) -> Result<PathBuf, PersistError>;
}

/// 保存到下载目录，从不覆盖已有文件
#[derive(Debug, Clone)]
pub struct DownloadDir {
    root: PathBuf,
}

impl DownloadDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn create_unique(&self, name: &str) -> Result<(PathBuf, tokio::fs::File), PersistError> {
        let (stem, ext) = split_extension(name);

        for n in 0..MAX_NAME_ATTEMPTS {
            let candidate = if n == 0 {
                name.to_string()
            } else {
                format!("{stem} ({n}){ext}")
            };
            let path = self.root.join(&candidate);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("{} exists, trying next name", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PersistError::NoFreeName(name.to_string()))
    }
}

#[async_trait]
impl FileSink for DownloadDir {
    async fn save(&mut self, file: &ReceivedFile) -> Result<PathBuf, PersistError> {
        create_dir_all(&self.root).await?;

        let name = sanitize_file_name(&file.name);
        let (path, output) = self.create_unique(&name).await?;
        write_or_remove(output, &path, &file.payload).await?;

        info!("Saved {} ({} bytes)", path.display(), file.payload.len());
        Ok(path)
    }
}

/// 写入已创建的文件，失败时删除写了一半的文件
async fn write_or_remove<W>(mut output: W, path: &Path, payload: &[u8]) -> Result<(), PersistError>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        output.write_all(payload).await?;
        output.flush().await
    }
    .await;
    drop(output);

    if let Err(e) = written {
        warn!("Writing {} failed: {}", path.display(), e);
        if let Err(remove_err) = remove_file(path).await {
            warn!("Could not remove {}: {}", path.display(), remove_err);
        }
        return Err(e.into());
    }
    Ok(())
}

/// 保留在内存中，供嵌入方和测试使用
#[derive(Debug, Default)]
pub struct MemoryFileSink {
    pub files: Vec<ReceivedFile>,
}

#[async_trait]
impl FileSink for MemoryFileSink {
    async fn save(&mut self, file: &ReceivedFile) -> Result<PathBuf, PersistError> {
        self.files.push(file.clone());
        Ok(PathBuf::from(&file.name))
    }
}

/// 只保留文件名的最后一段，去掉 `..` 等路径成分
pub fn sanitize_file_name(name: &str) -> String {
    let unified = name.replace('\\', "/");
    let last = Path::new(&unified)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .next_back()
        .unwrap_or_default();

    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && *c != ':')
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// `photo.tar.gz` → (`photo.tar`, `.gz`)；没有扩展名时第二项为空
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}
