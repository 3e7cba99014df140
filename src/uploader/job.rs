// 上传任务定义
//
// 任务身份采用内容寻址：id 即完整指纹，字节相同的两次提交得到同一个 key

use crate::uploader::{FileChunk, FileFingerprint};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 默认最大并发分片数（单个分组的大小）
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

/// 传输选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOptions {
    /// 上传端点
    pub endpoint: String,
    /// 最大并发分片数
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

/// 上传任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadJobStatus {
    /// 等待传输
    Pending,
    /// 传输中
    Transferring,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

/// 上传任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    /// 任务 ID（等于 full_hash，内容寻址）
    pub id: String,
    /// 本地文件路径（只读引用，不会整体载入内存）
    pub local_path: PathBuf,
    /// 文件名
    pub filename: String,
    /// 文件总大小
    pub total_size: u64,
    /// 分片计划（索引升序）
    pub chunks: Vec<FileChunk>,
    /// 分片数量
    pub chunk_count: usize,
    /// 完整内容指纹（hex）
    pub full_hash: String,
    /// 采样指纹（hex）
    pub sample_hash: String,
    /// 传输选项
    pub options: UploadOptions,
    /// 任务状态
    pub status: UploadJobStatus,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,
    /// 错误信息
    pub error: Option<String>,
}

impl UploadJob {
    /// 创建新的上传任务
    ///
    /// 仅在分片计划与双指纹都计算完成后调用，不存在半成品任务
    pub fn new(
        local_path: PathBuf,
        filename: String,
        chunks: Vec<FileChunk>,
        fingerprint: FileFingerprint,
        options: UploadOptions,
    ) -> Self {
        let chunk_count = chunks.len();
        Self {
            id: fingerprint.full_hash.clone(),
            local_path,
            filename,
            total_size: fingerprint.file_size,
            chunks,
            chunk_count,
            full_hash: fingerprint.full_hash,
            sample_hash: fingerprint.sample_hash,
            options,
            status: UploadJobStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// 分组数量 = ceil(分片数 / 最大并发数)
    pub fn group_count(&self) -> usize {
        self.chunk_count
            .div_ceil(self.options.max_concurrency.max(1))
    }

    /// 标记为传输中
    pub fn mark_transferring(&mut self) {
        self.status = UploadJobStatus::Transferring;
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now().timestamp());
        }
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self) {
        self.status = UploadJobStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) {
        self.status = UploadJobStatus::Failed;
        self.error = Some(error);
    }
}
