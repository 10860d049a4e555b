//! 应用配置和持久化
//!
//! 提供监听地址、下载目录、分块大小等设置的存储和读取。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::transfer::{AcceptPolicy, DEFAULT_CHUNK_SIZE};

/// 默认监听地址
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// 发送端等待确认的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    /// 每个文件发完后等待确认再发下一个
    #[default]
    PerFile,
    /// 先发完所有文件，再统一收集确认
    Deferred,
}

impl AckMode {
    pub fn name(&self) -> &'static str {
        match self {
            AckMode::PerFile => "per-file",
            AckMode::Deferred => "deferred",
        }
    }
}

/// 应用设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 分享时监听的地址
    pub listen_addr: String,
    /// 写进分享链接的主机名（为空则使用本机主机名）
    pub public_host: Option<String>,
    /// 下载目录
    pub download_dir: PathBuf,
    /// 分块大小（字节）
    pub chunk_size: usize,
    /// 允许发送的 MIME 前缀，空列表表示不限制
    pub accepted_types: Vec<String>,
    pub ack_mode: AckMode,
    /// 大小与声明不符时丢弃文件
    pub strict_size: bool,
    /// 是否自动接受传输
    pub auto_accept: bool,
    /// 详细日志模式
    pub verbose: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            public_host: None,
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            chunk_size: DEFAULT_CHUNK_SIZE,
            accepted_types: vec!["image/".to_string(), "video/".to_string()],
            ack_mode: AckMode::PerFile,
            strict_size: false,
            auto_accept: false,
            verbose: false,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("instashare");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 与配置文件相同的 TOML 文本
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn accept_policy(&self) -> AcceptPolicy {
        AcceptPolicy::new(self.accepted_types.iter().cloned())
    }

    /// 分享链接中的主机名
    pub fn advertised_host(&self) -> String {
        self.public_host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(get_default_host)
    }
}

/// 获取默认主机名
fn get_default_host() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}
