// 任务注册表
//
// 进程内唯一持有 UploadJob 记录的组件，显式构造、随会话销毁，
// 不使用全局可变状态。调度器只通过快照读取与受限写回访问任务

use crate::uploader::{UploadJob, UploadJobStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// register 的结果
///
/// 身份冲突（字节相同的内容重复提交）不做静默覆盖，
/// 由调用方根据已有任务的状态决定策略
#[derive(Debug)]
pub enum RegisterOutcome {
    /// 新任务已写入
    Created,
    /// 同身份任务已存在（返回其快照，注册表未被修改）
    AlreadyExists(UploadJob),
}

/// 任务注册表
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, UploadJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册任务
    ///
    /// 已存在同身份任务时不覆盖，返回 `AlreadyExists`
    pub async fn register(&self, job: UploadJob) -> RegisterOutcome {
        let mut jobs = self.jobs.write().await;
        if let Some(existing) = jobs.get(&job.id) {
            debug!("任务 {} 已存在 (状态: {:?})", job.id, existing.status);
            return RegisterOutcome::AlreadyExists(existing.clone());
        }

        info!("任务 {} 已注册: {} 个分片", job.id, job.chunk_count);
        jobs.insert(job.id.clone(), job);
        RegisterOutcome::Created
    }

    /// 强制写入（覆盖同身份的旧条目）
    pub async fn replace(&self, job: UploadJob) {
        info!("任务 {} 已重新注册", job.id);
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    /// 查询任务快照
    pub async fn lookup(&self, id: &str) -> Option<UploadJob> {
        self.jobs.read().await.get(id).cloned()
    }

    /// 查询任务状态
    pub async fn status(&self, id: &str) -> Option<UploadJobStatus> {
        self.jobs.read().await.get(id).map(|job| job.status)
    }

    /// 原地更新任务
    ///
    /// 返回 false 表示任务不存在
    pub async fn update<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut UploadJob),
    {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) => {
                mutate(job);
                true
            }
            None => false,
        }
    }

    /// 移除任务
    ///
    /// 任务不存在时为无操作（重复移除不是错误）
    pub async fn retire(&self, id: &str) -> bool {
        let removed = self.jobs.write().await.remove(id).is_some();
        if removed {
            info!("任务 {} 已从注册表移除", id);
        } else {
            debug!("任务 {} 不在注册表中，跳过移除", id);
        }
        removed
    }

    /// 当前任务数量
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
