// 分组调度器
//
// 驱动单个任务的有界并发传输：
// - 将分片计划按 max_concurrency 切成连续分组，末组可以不满
// - 组内每个分片各自 spawn 发送，组边界是 join 屏障——
//   同时在途分片数不超过 max_concurrency，组间严格有序
// - 每组确认后发出一次 progress 事件，末组之后发出 finish 事件，
//   然后显式等待任务从注册表移除完成
// - 组级超时与组间取消检查防止任务无限停滞
//
// 失败语义：任一分片失败即中止剩余分组，任务标记为失败并保留在
// 注册表中（不静默移除），其他任务不受影响

use crate::error::UploadError;
use crate::uploader::{ChunkPayload, ChunkTransport, FileChunk, JobRegistry, UploadJob, UploadJobStatus};
use crate::worker::UploadEvent;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 默认分组传输超时: 300 秒
pub const DEFAULT_GROUP_TIMEOUT_SECS: u64 = 300;

/// 将分片序列切分为连续分组
///
/// 分组大小为 `group_size`，最后一组可能更小
pub fn make_groups(chunks: &[FileChunk], group_size: usize) -> Vec<Vec<FileChunk>> {
    chunks
        .chunks(group_size.max(1))
        .map(|group| group.to_vec())
        .collect()
}

/// 分组调度器
#[derive(Clone)]
pub struct GroupScheduler {
    registry: Arc<JobRegistry>,
    transport: Arc<dyn ChunkTransport>,
    events: mpsc::UnboundedSender<UploadEvent>,
    group_timeout: Duration,
}

impl GroupScheduler {
    pub fn new(
        registry: Arc<JobRegistry>,
        transport: Arc<dyn ChunkTransport>,
        events: mpsc::UnboundedSender<UploadEvent>,
        group_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            events,
            group_timeout,
        }
    }

    /// 执行一个任务的完整传输
    ///
    /// 状态机: pending -> transferring -> completed（终态）
    /// 成功路径发出 N 个 progress 事件与 1 个 finish 事件（N = 分组数，
    /// 空文件 N = 0），随后任务退役；失败路径由调用方上报 failed 事件
    pub async fn run(&self, job_id: &str, cancel: CancellationToken) -> Result<(), UploadError> {
        let job = self
            .registry
            .lookup(job_id)
            .await
            .ok_or_else(|| UploadError::UnknownJob(job_id.to_string()))?;

        if job.status == UploadJobStatus::Transferring {
            return Err(UploadError::DuplicateSubmission(job_id.to_string()));
        }

        self.registry
            .update(job_id, |j| j.mark_transferring())
            .await;

        let started = Instant::now();
        let groups = make_groups(&job.chunks, job.options.max_concurrency);

        info!(
            "任务 {} 开始传输: {} 个分片, {} 组 (并发 {})",
            job_id,
            job.chunk_count,
            groups.len(),
            job.options.max_concurrency
        );

        match self.run_groups(&job, &groups, &cancel).await {
            Ok(()) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.registry.update(job_id, |j| j.mark_completed()).await;

                info!("任务 {} 传输完成, 耗时 {}ms", job_id, elapsed_ms);
                let _ = self.events.send(UploadEvent::Finish {
                    job_id: job_id.to_string(),
                    elapsed_ms,
                });

                // 显式等待移除完成，避免清理与后续状态读取竞争
                self.registry.retire(job_id).await;
                Ok(())
            }
            Err(e) => {
                error!("任务 {} 传输失败: {}", job_id, e);
                // 失败任务保留在注册表中供检查或重新提交
                self.registry
                    .update(job_id, |j| j.mark_failed(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// 按序执行所有分组
    async fn run_groups(
        &self,
        job: &UploadJob,
        groups: &[Vec<FileChunk>],
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        for (group_index, group) in groups.iter().enumerate() {
            // 组间取消检查
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            self.dispatch_group(job, group_index, group).await?;

            let completed_chunk_indices: Vec<usize> = group.iter().map(|c| c.index).collect();
            debug!(
                "任务 {} 分组 {}/{} 已确认: 分片 {:?}",
                job.id,
                group_index + 1,
                groups.len(),
                completed_chunk_indices
            );

            let _ = self.events.send(UploadEvent::Progress {
                job_id: job.id.clone(),
                group_count: groups.len(),
                completed_chunk_indices,
            });
        }

        Ok(())
    }

    /// 并发发送一个分组的所有分片并等待全部确认
    async fn dispatch_group(
        &self,
        job: &UploadJob,
        group_index: usize,
        group: &[FileChunk],
    ) -> Result<(), UploadError> {
        let mut handles = Vec::with_capacity(group.len());

        for chunk in group {
            let transport = Arc::clone(&self.transport);
            let chunk = chunk.clone();
            let local_path = job.local_path.clone();
            let endpoint = job.options.endpoint.clone();
            let job_id = job.id.clone();
            let chunk_count = job.chunk_count;

            handles.push(tokio::spawn(async move {
                let index = chunk.index;
                let data = chunk
                    .read_data(&local_path)
                    .await
                    .map_err(|e| UploadError::ChunkRead(format!("分片 #{}: {:#}", index, e)))?;

                transport
                    .send_chunk(
                        &endpoint,
                        ChunkPayload {
                            index,
                            chunk_count,
                            job_id,
                            data,
                        },
                    )
                    .await
                    .map_err(|e| UploadError::Transport {
                        chunk_index: index,
                        message: format!("{:#}", e),
                    })?;

                Ok::<usize, UploadError>(index)
            }));
        }

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(self.group_timeout, futures::future::join_all(handles)).await {
            Err(_) => {
                // 超时后中止组内残余任务
                for handle in abort_handles {
                    handle.abort();
                }
                Err(UploadError::GroupTimeout {
                    group_index,
                    timeout_secs: self.group_timeout.as_secs(),
                })
            }
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(Ok(index)) => {
                            debug!("任务 {} 分片 #{} 已确认", job.id, index);
                        }
                        Ok(Err(e)) => return Err(e),
                        Err(join_err) => return Err(UploadError::Task(join_err.to_string())),
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::{split_chunks, FingerprintEngine, UploadOptions};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    /// 记录发送顺序的内存传输器，可指定某个分片失败或挂起
    struct MockTransport {
        sent: Mutex<Vec<usize>>,
        fail_on: Option<usize>,
        stall_on: Option<usize>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_on: None,
                stall_on: None,
            }
        }

        fn failing_on(index: usize) -> Self {
            Self {
                fail_on: Some(index),
                ..Self::new()
            }
        }

        fn stalling_on(index: usize) -> Self {
            Self {
                stall_on: Some(index),
                ..Self::new()
            }
        }

        fn sent_indices(&self) -> Vec<usize> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChunkTransport for MockTransport {
        async fn send_chunk(&self, _endpoint: &str, payload: ChunkPayload) -> Result<()> {
            if self.stall_on == Some(payload.index) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail_on == Some(payload.index) {
                anyhow::bail!("模拟传输失败");
            }
            self.sent.lock().unwrap().push(payload.index);
            Ok(())
        }
    }

    struct Harness {
        registry: Arc<JobRegistry>,
        transport: Arc<MockTransport>,
        scheduler: GroupScheduler,
        events: mpsc::UnboundedReceiver<UploadEvent>,
        _temp_file: NamedTempFile,
        job_id: String,
    }

    async fn setup(
        content: &[u8],
        chunk_size: u64,
        max_concurrency: usize,
        transport: MockTransport,
        group_timeout: Duration,
    ) -> Harness {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content).unwrap();
        temp_file.flush().unwrap();

        let chunks = split_chunks(content.len() as u64, chunk_size);
        let fingerprint = FingerprintEngine::compute(temp_file.path(), &chunks)
            .await
            .unwrap();

        let job = UploadJob::new(
            temp_file.path().to_path_buf(),
            "test.bin".to_string(),
            chunks,
            fingerprint,
            UploadOptions {
                endpoint: "mock://upload".to_string(),
                max_concurrency,
            },
        );
        let job_id = job.id.clone();

        let registry = Arc::new(JobRegistry::new());
        registry.register(job).await;

        let transport = Arc::new(transport);
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = GroupScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&transport) as Arc<dyn ChunkTransport>,
            tx,
            group_timeout,
        );

        Harness {
            registry,
            transport,
            scheduler,
            events: rx,
            _temp_file: temp_file,
            job_id,
        }
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_make_groups() {
        let chunks = split_chunks(5, 1);
        // 5 分片 / 组大小 2 => [2, 2, 1]
        let groups = make_groups(&chunks, 2);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 2);
        assert_eq!(groups[2].len(), 1);
        assert_eq!(groups[2][0].index, 4);

        // 组大小 0 按 1 处理
        assert_eq!(make_groups(&chunks, 0).len(), 5);
        assert!(make_groups(&[], 3).is_empty());
    }

    #[tokio::test]
    async fn test_run_emits_progress_then_finish() {
        // 5 个分片、并发 2 => 3 组
        let content = vec![7u8; 500];
        let mut h = setup(&content, 100, 2, MockTransport::new(), Duration::from_secs(30)).await;

        h.scheduler
            .run(&h.job_id, CancellationToken::new())
            .await
            .unwrap();

        let events = drain_events(&mut h.events);
        assert_eq!(events.len(), 4);

        for (i, event) in events.iter().take(3).enumerate() {
            match event {
                UploadEvent::Progress {
                    job_id,
                    group_count,
                    completed_chunk_indices,
                } => {
                    assert_eq!(job_id, &h.job_id);
                    assert_eq!(*group_count, 3);
                    let expected: Vec<usize> = match i {
                        0 => vec![0, 1],
                        1 => vec![2, 3],
                        _ => vec![4],
                    };
                    assert_eq!(completed_chunk_indices, &expected);
                }
                other => panic!("期望 progress 事件, 得到 {:?}", other),
            }
        }
        assert!(matches!(events[3], UploadEvent::Finish { .. }));

        // 所有分片均已发送，组间严格有序
        let mut sent = h.transport.sent_indices();
        assert_eq!(sent.len(), 5);
        assert!(sent[..2].iter().all(|i| *i < 2));
        assert!(sent[2..4].iter().all(|i| (2..4).contains(i)));
        assert_eq!(sent[4], 4);
        sent.sort_unstable();
        assert_eq!(sent, vec![0, 1, 2, 3, 4]);

        // finish 之后任务已退役
        assert!(h.registry.lookup(&h.job_id).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_file_finishes_immediately() {
        let mut h = setup(b"", 100, 3, MockTransport::new(), Duration::from_secs(30)).await;

        h.scheduler
            .run(&h.job_id, CancellationToken::new())
            .await
            .unwrap();

        // 0 组：无 progress，只有 finish
        let events = drain_events(&mut h.events);
        assert_eq!(events.len(), 1);
        match &events[0] {
            UploadEvent::Finish { job_id, .. } => assert_eq!(job_id, &h.job_id),
            other => panic!("期望 finish 事件, 得到 {:?}", other),
        }

        assert!(h.transport.sent_indices().is_empty());
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let h = setup(b"data", 2, 2, MockTransport::new(), Duration::from_secs(30)).await;

        let err = h
            .scheduler
            .run("不存在的任务", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnknownJob(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_job() {
        // 分片 2（第二组）失败：第一组正常确认，之后中止
        let content = vec![1u8; 400];
        let mut h = setup(
            &content,
            100,
            2,
            MockTransport::failing_on(2),
            Duration::from_secs(30),
        )
        .await;

        let err = h
            .scheduler
            .run(&h.job_id, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transport { chunk_index: 2, .. }));

        // 只有第一组的 progress，无 finish
        let events = drain_events(&mut h.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], UploadEvent::Progress { .. }));

        // 任务保留在注册表中并标记为失败
        let job = h.registry.lookup(&h.job_id).await.unwrap();
        assert_eq!(job.status, UploadJobStatus::Failed);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn test_group_timeout() {
        let content = vec![9u8; 200];
        let mut h = setup(
            &content,
            100,
            2,
            MockTransport::stalling_on(1),
            Duration::from_millis(100),
        )
        .await;

        let err = h
            .scheduler
            .run(&h.job_id, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::GroupTimeout { group_index: 0, .. }));

        assert!(drain_events(&mut h.events).is_empty());
        assert_eq!(
            h.registry.status(&h.job_id).await,
            Some(UploadJobStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_cancellation_between_groups() {
        let content = vec![3u8; 300];
        let h = setup(&content, 100, 1, MockTransport::new(), Duration::from_secs(30)).await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h.scheduler.run(&h.job_id, cancel).await.unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert!(h.transport.sent_indices().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_while_transferring_rejected() {
        let content = vec![5u8; 100];
        let h = setup(&content, 100, 1, MockTransport::new(), Duration::from_secs(30)).await;

        h.registry
            .update(&h.job_id, |j| j.mark_transferring())
            .await;

        let err = h
            .scheduler
            .run(&h.job_id, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::DuplicateSubmission(_)));
    }
}
