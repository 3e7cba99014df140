// 上传工作器与命令/事件协议
//
// 注册表与分组调度器只通过这套消息契约对外暴露：
// 调用方经命令通道提交文件、发起传输，经事件通道接收
// ready / progress / finish / failed 事件。
// 事件采用 tag 字段序列化，便于跨进程边界转发

use crate::error::UploadError;
use crate::uploader::{
    split_chunks, ChunkTransport, FingerprintEngine, GroupScheduler, JobRegistry, RegisterOutcome,
    UploadJob, UploadJobStatus, UploadOptions,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 上传命令（入站）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum UploadCommand {
    /// 提交文件：切分、计算指纹并注册任务，随后发出 ready 事件
    SelectFile {
        path: PathBuf,
        options: UploadOptions,
    },
    /// 对已注册任务发起分组传输
    StartUpload { job_id: String },
}

/// 上传事件（出站）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 任务已注册，可以发起传输
    Ready {
        job_id: String,
        filename: String,
        chunk_count: usize,
        full_hash: String,
        sample_hash: String,
    },
    /// 一个分组传输完成
    Progress {
        job_id: String,
        group_count: usize,
        completed_chunk_indices: Vec<usize>,
    },
    /// 全部分组传输完成，任务即将退役
    Finish { job_id: String, elapsed_ms: u64 },
    /// 任务失败
    Failed {
        job_id: String,
        kind: String,
        error: String,
    },
}

impl UploadEvent {
    /// 获取任务 ID
    pub fn job_id(&self) -> &str {
        match self {
            UploadEvent::Ready { job_id, .. } => job_id,
            UploadEvent::Progress { job_id, .. } => job_id,
            UploadEvent::Finish { job_id, .. } => job_id,
            UploadEvent::Failed { job_id, .. } => job_id,
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            UploadEvent::Ready { .. } => "ready",
            UploadEvent::Progress { .. } => "progress",
            UploadEvent::Finish { .. } => "finish",
            UploadEvent::Failed { .. } => "failed",
        }
    }
}

/// 上传工作器
///
/// 独占持有注册表，将命令分派给分片计划构建与分组调度器。
/// 单个任务内的处理顺序与事件顺序严格一致；不同任务互不相关
pub struct UploadWorker {
    registry: Arc<JobRegistry>,
    scheduler: GroupScheduler,
    events: mpsc::UnboundedSender<UploadEvent>,
    cancel: CancellationToken,
    chunk_size: u64,
}

impl UploadWorker {
    /// 创建上传工作器
    ///
    /// # 参数
    /// * `chunk_size` - 分片大小（字节）
    /// * `group_timeout` - 单个分组的传输超时
    /// * `transport` - 注入的分片传输器
    /// * `events` - 事件发送端
    pub fn new(
        chunk_size: u64,
        group_timeout: Duration,
        transport: Arc<dyn ChunkTransport>,
        events: mpsc::UnboundedSender<UploadEvent>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let scheduler = GroupScheduler::new(
            Arc::clone(&registry),
            transport,
            events.clone(),
            group_timeout,
        );
        Self {
            registry,
            scheduler,
            events,
            cancel: CancellationToken::new(),
            chunk_size,
        }
    }

    /// 注册表句柄
    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    /// 取消令牌（取消后正在传输的任务在组边界停止）
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 命令循环：逐条处理命令直到通道关闭
    pub async fn run(&self, mut commands: mpsc::UnboundedReceiver<UploadCommand>) {
        while let Some(command) = commands.recv().await {
            self.handle_command(command).await;
        }
        info!("命令通道已关闭，上传工作器退出");
    }

    /// 处理单条命令
    pub async fn handle_command(&self, command: UploadCommand) {
        match command {
            UploadCommand::SelectFile { path, options } => self.select_file(path, options).await,
            UploadCommand::StartUpload { job_id } => self.start_upload(job_id).await,
        }
    }

    /// 提交文件：构建分片计划、计算双指纹、注册任务
    ///
    /// 重复提交策略：已有同身份任务正在传输时拒绝；
    /// 其余状态用等价的新任务覆盖并再次发出 ready
    async fn select_file(&self, path: PathBuf, options: UploadOptions) {
        let job = match self.build_job(&path, options).await {
            Ok(job) => job,
            Err(e) => {
                // 切分或指纹计算失败：不注册半成品任务
                error!("创建上传任务失败: path={:?}, 错误: {:#}", path, e);
                let _ = self.events.send(UploadEvent::Failed {
                    job_id: path.display().to_string(),
                    kind: "job_create".to_string(),
                    error: format!("{:#}", e),
                });
                return;
            }
        };

        let ready = UploadEvent::Ready {
            job_id: job.id.clone(),
            filename: job.filename.clone(),
            chunk_count: job.chunk_count,
            full_hash: job.full_hash.clone(),
            sample_hash: job.sample_hash.clone(),
        };

        match self.registry.register(job.clone()).await {
            RegisterOutcome::Created => {
                let _ = self.events.send(ready);
            }
            RegisterOutcome::AlreadyExists(existing)
                if existing.status == UploadJobStatus::Transferring =>
            {
                warn!("任务 {} 正在传输中，拒绝重复提交", existing.id);
                let err = UploadError::DuplicateSubmission(existing.id.clone());
                let _ = self.events.send(UploadEvent::Failed {
                    job_id: existing.id,
                    kind: err.kind().to_string(),
                    error: err.to_string(),
                });
            }
            RegisterOutcome::AlreadyExists(_) => {
                // 字节相同的内容：用等价的新任务覆盖旧条目
                self.registry.replace(job).await;
                let _ = self.events.send(ready);
            }
        }
    }

    /// 发起传输（每个任务独立执行，互不阻塞）
    async fn start_upload(&self, job_id: String) {
        let scheduler = self.scheduler.clone();
        let events = self.events.clone();
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            if let Err(e) = scheduler.run(&job_id, cancel).await {
                let _ = events.send(UploadEvent::Failed {
                    job_id,
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                });
            }
        });
    }

    /// 构建任务：分片计划 + 双指纹都完成后才生成任务记录
    async fn build_job(&self, path: &Path, options: UploadOptions) -> Result<UploadJob> {
        let metadata = tokio::fs::metadata(path)
            .await
            .context(format!("无法读取文件元数据: {:?}", path))?;
        if !metadata.is_file() {
            anyhow::bail!("不是普通文件: {:?}", path);
        }

        let chunks = split_chunks(metadata.len(), self.chunk_size);
        let fingerprint = FingerprintEngine::compute(path, &chunks).await?;

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(UploadJob::new(
            path.to_path_buf(),
            filename,
            chunks,
            fingerprint,
            options,
        ))
    }
}
