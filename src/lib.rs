// Chunk Upload Rust Library
// 大文件分片上传核心库

// 配置管理模块
pub mod config;

// 错误类型模块
pub mod error;

// 日志系统模块
pub mod logging;

// 上传引擎模块
pub mod uploader;

// 命令/事件协议与上传工作器
pub mod worker;

// 导出常用类型
pub use config::{AppConfig, LogConfig, UploadConfig};
pub use error::UploadError;
pub use uploader::{
    ChunkPayload, ChunkTransport, FileChunk, FileFingerprint, FingerprintEngine, GroupScheduler,
    HttpChunkTransport, JobRegistry, RegisterOutcome, UploadJob, UploadJobStatus, UploadOptions,
};
pub use worker::{UploadCommand, UploadEvent, UploadWorker};
