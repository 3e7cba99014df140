// 上传分片计划
//
// 将本地文件按固定大小切分为有序分片，并为每个分片抽取采样区间：
// - 分片 0：采样区间即整个分片（采样指纹锚定文件头部的真实内容）
// - 其余分片：开头 2 字节 + 中间 2 字节（floor(len/2) 处）+ 末尾 2 字节
//
// 所有分片区间拼接后精确还原原文件，无空洞、无重叠

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// 默认上传分片大小: 2MB
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// 采样片段长度: 2 字节
pub const SAMPLE_SPAN: u64 = 2;

/// 上传分片信息
///
/// 区间均为源文件内的绝对字节范围（视图，不持有数据）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunk {
    /// 分片索引（0 起始，连续递增）
    pub index: usize,
    /// 字节范围 `[start, end)`
    pub range: Range<u64>,
    /// 采样区间列表（固定顺序）
    pub sample: Vec<Range<u64>>,
}

impl FileChunk {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        let sample = if index == 0 {
            vec![range.clone()]
        } else {
            sample_ranges(&range)
        };
        Self {
            index,
            range,
            sample,
        }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 读取分片数据
    ///
    /// # 参数
    /// * `file_path` - 本地文件路径
    ///
    /// # 返回
    /// 分片数据字节数组
    pub async fn read_data(&self, file_path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(file_path).await.context("打开上传文件失败")?;

        // 定位到分片起始位置
        file.seek(std::io::SeekFrom::Start(self.range.start))
            .await
            .context("文件定位失败")?;

        // 读取分片数据
        let chunk_size = self.size() as usize;
        let mut buffer = vec![0u8; chunk_size];
        file.read_exact(&mut buffer)
            .await
            .context("读取分片数据失败")?;

        debug!(
            "读取分片 #{}: bytes={}-{}, 大小={} bytes",
            self.index,
            self.range.start,
            self.range.end.saturating_sub(1),
            chunk_size
        );

        Ok(buffer)
    }
}

/// 计算非首个分片的采样区间
///
/// 开头 2 字节、floor(len/2) 处 2 字节、末尾 2 字节，均不越过分片边界。
/// 分片很小时区间可能重叠或重复，采样流保持确定性即可
fn sample_ranges(range: &Range<u64>) -> Vec<Range<u64>> {
    let start = range.start;
    let len = range.end - range.start;

    let head = start..start + SAMPLE_SPAN.min(len);
    let mid_offset = len / 2;
    let middle = start + mid_offset..start + (mid_offset + SAMPLE_SPAN).min(len);
    let tail = start + len.saturating_sub(SAMPLE_SPAN)..range.end;

    vec![head, middle, tail]
}

/// 按分片大小切分文件
///
/// 从偏移 0 开始以 `chunk_size` 为步长划分，最后一个分片可能不足一个步长。
/// 空文件返回空分片序列
pub fn split_chunks(file_size: u64, chunk_size: u64) -> Vec<FileChunk> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut offset = 0u64;
    let mut index = 0;

    while offset < file_size {
        let end = std::cmp::min(offset + chunk_size, file_size);
        chunks.push(FileChunk::new(index, offset..end));
        offset = end;
        index += 1;
    }

    debug!(
        "文件切分完成: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
        file_size,
        chunk_size,
        chunks.len()
    );

    chunks
}
