// 错误类型定义
//
// 对外可观测的失败统一经由事件通道上报，kind() 给出事件携带的稳定类别名

use thiserror::Error;

/// 上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// start_upload 引用了注册表中不存在的任务
    #[error("未知上传任务: {0}")]
    UnknownJob(String),

    /// 同身份任务正在传输中，拒绝重复提交
    #[error("重复提交: 任务 {0} 正在传输中")]
    DuplicateSubmission(String),

    /// 外部传输失败
    #[error("分片 #{chunk_index} 传输失败: {message}")]
    Transport { chunk_index: usize, message: String },

    /// 分组传输超时
    #[error("分组 {group_index} 传输超时 ({timeout_secs}s)")]
    GroupTimeout {
        group_index: usize,
        timeout_secs: u64,
    },

    /// 任务已取消
    #[error("任务已取消")]
    Cancelled,

    /// 读取分片数据失败
    #[error("读取分片数据失败: {0}")]
    ChunkRead(String),

    /// 后台任务执行失败
    #[error("任务执行失败: {0}")]
    Task(String),
}

impl UploadError {
    /// 稳定的错误类别名（随 failed 事件上报）
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::UnknownJob(_) => "unknown_job",
            UploadError::DuplicateSubmission(_) => "duplicate_submission",
            UploadError::Transport { .. } => "transport",
            UploadError::GroupTimeout { .. } => "group_timeout",
            UploadError::Cancelled => "cancelled",
            UploadError::ChunkRead(_) => "chunk_read",
            UploadError::Task(_) => "task",
        }
    }
}
