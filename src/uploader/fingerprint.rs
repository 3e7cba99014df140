// 文件指纹计算器
//
// 对分片计划计算两种 BLAKE3 指纹：
// 1. 完整指纹 (full_hash)：按索引顺序对每个分片的全部字节做流式哈希，
//    读取量 O(文件大小)，作为任务身份与最终完整性校验
// 2. 采样指纹 (sample_hash)：按索引顺序对每个分片的采样区间做哈希，
//    读取量 O(分片数)，用于低成本的快速查重
//
// 两种指纹对固定分片大小都是文件内容的纯函数，重复计算结果一致

use crate::uploader::FileChunk;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;
use tracing::debug;

/// 读缓冲区大小: 64KB
const READ_BUF_SIZE: usize = 65536;

/// 文件指纹
#[derive(Debug, Clone)]
pub struct FileFingerprint {
    /// 完整内容 BLAKE3（hex）
    pub full_hash: String,
    /// 采样 BLAKE3（hex）
    pub sample_hash: String,
    /// 文件大小
    pub file_size: u64,
}

/// 指纹计算器
pub struct FingerprintEngine;

impl FingerprintEngine {
    /// 计算分片计划对应的双指纹
    ///
    /// # 参数
    /// * `path` - 本地文件路径
    /// * `chunks` - 分片计划（read_data 的来源文件必须一致）
    ///
    /// # 返回
    /// 完整指纹与采样指纹
    pub async fn compute(path: &Path, chunks: &[FileChunk]) -> Result<FileFingerprint> {
        let path = path.to_path_buf();
        let chunks = chunks.to_vec();

        // 在阻塞线程池中执行文件 I/O
        tokio::task::spawn_blocking(move || Self::compute_sync(&path, &chunks))
            .await
            .context("指纹计算任务执行失败")?
    }

    /// 同步计算双指纹（内部方法）
    fn compute_sync(path: &Path, chunks: &[FileChunk]) -> Result<FileFingerprint> {
        let file = File::open(path).context(format!("无法打开文件: {:?}", path))?;
        let file_size = chunks.last().map(|c| c.range.end).unwrap_or(0);

        // 1. 完整指纹：顺序流式读取分片计划覆盖的全部字节
        let mut reader = BufReader::with_capacity(1024 * 1024, file);
        let mut full_hasher = blake3::Hasher::new();
        let mut buffer = [0u8; READ_BUF_SIZE];
        let mut remaining = file_size;

        while remaining > 0 {
            let to_read = (remaining as usize).min(buffer.len());
            let bytes_read = reader
                .read(&mut buffer[..to_read])
                .context("读取文件失败")?;
            if bytes_read == 0 {
                anyhow::bail!("文件在哈希计算期间被截断: {:?}", path);
            }
            full_hasher.update(&buffer[..bytes_read]);
            remaining -= bytes_read as u64;
        }

        // 2. 采样指纹：按分片顺序对各采样区间做小范围读取
        let mut sample_hasher = blake3::Hasher::new();
        let file = reader.into_inner();
        let mut reader = BufReader::with_capacity(READ_BUF_SIZE, file);

        for chunk in chunks {
            for range in &chunk.sample {
                Self::hash_range(&mut reader, range, &mut sample_hasher)
                    .context(format!("读取分片 #{} 采样区间失败", chunk.index))?;
            }
        }

        let full_hash = full_hasher.finalize().to_hex().to_string();
        let sample_hash = sample_hasher.finalize().to_hex().to_string();

        debug!(
            "文件指纹计算完成: path={:?}, size={}, full_hash={}, sample_hash={}",
            path, file_size, full_hash, sample_hash
        );

        Ok(FileFingerprint {
            full_hash,
            sample_hash,
            file_size,
        })
    }

    /// 将一个字节区间喂入哈希器
    fn hash_range(
        reader: &mut (impl Read + Seek),
        range: &Range<u64>,
        hasher: &mut blake3::Hasher,
    ) -> Result<()> {
        reader.seek(SeekFrom::Start(range.start)).context("文件定位失败")?;

        let mut buffer = [0u8; READ_BUF_SIZE];
        let mut remaining = range.end - range.start;

        while remaining > 0 {
            let to_read = (remaining as usize).min(buffer.len());
            let bytes_read = reader.read(&mut buffer[..to_read]).context("读取文件失败")?;
            if bytes_read == 0 {
                anyhow::bail!("采样区间越过文件末尾");
            }
            hasher.update(&buffer[..bytes_read]);
            remaining -= bytes_read as u64;
        }

        Ok(())
    }
}
