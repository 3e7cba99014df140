// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分片大小 (MB)
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    /// 默认最大并发分片数（单个分组的大小）
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 单个分组的传输超时（秒）
    #[serde(default = "default_group_timeout_secs")]
    pub group_timeout_secs: u64,
}

fn default_chunk_size_mb() -> u64 {
    2
}

fn default_max_concurrency() -> usize {
    crate::uploader::DEFAULT_MAX_CONCURRENCY
}

fn default_group_timeout_secs() -> u64 {
    crate::uploader::DEFAULT_GROUP_TIMEOUT_SECS
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: default_chunk_size_mb(),
            max_concurrency: default_max_concurrency(),
            group_timeout_secs: default_group_timeout_secs(),
        }
    }
}

impl UploadConfig {
    /// 分片大小（字节）
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size_mb * 1024 * 1024
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 从 TOML 文件加载配置
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context(format!("读取配置文件失败: {:?}", path))?;
        toml::from_str(&content).context(format!("解析配置文件失败: {:?}", path))
    }

    /// 加载配置，文件缺失或无效时回退到默认配置
    pub async fn load_or_default(path: &Path) -> Self {
        match Self::load(path).await {
            Ok(config) => config,
            Err(e) => {
                warn!("加载配置失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }
}
