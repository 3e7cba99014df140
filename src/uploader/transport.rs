// 分片传输接口
//
// 调度器通过注入的 trait 对象发送分片，便于在测试中替换为内存实现，
// 也便于在外层叠加重试/限速策略。确认返回即代表分片已被对端持久接收

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// 单个分片的发送载荷
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    /// 分片索引（对端据此重组文件）
    pub index: usize,
    /// 任务总分片数
    pub chunk_count: usize,
    /// 任务身份（完整指纹）
    pub job_id: String,
    /// 分片字节
    pub data: Vec<u8>,
}

/// 分片传输器
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// 发送一个分片并等待对端确认
    async fn send_chunk(&self, endpoint: &str, payload: ChunkPayload) -> Result<()>;
}

/// HTTP 分片传输器
///
/// 以 octet-stream POST 分片字节，索引与任务身份通过查询参数携带
#[derive(Debug, Clone)]
pub struct HttpChunkTransport {
    client: reqwest::Client,
}

impl HttpChunkTransport {
    /// 创建 HTTP 传输器
    ///
    /// # 参数
    /// * `request_timeout` - 单个分片请求的超时时间
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChunkTransport for HttpChunkTransport {
    async fn send_chunk(&self, endpoint: &str, payload: ChunkPayload) -> Result<()> {
        let response = self
            .client
            .post(endpoint)
            .query(&[
                ("job_id", payload.job_id.as_str()),
                ("chunk_index", &payload.index.to_string()),
                ("chunk_count", &payload.chunk_count.to_string()),
            ])
            .header("content-type", "application/octet-stream")
            .body(payload.data)
            .send()
            .await
            .context(format!("发送分片 #{} 请求失败", payload.index))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "分片 #{} 上传被服务器拒绝: HTTP {}",
                payload.index,
                response.status()
            );
        }

        Ok(())
    }
}
