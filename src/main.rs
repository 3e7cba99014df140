use anyhow::{Context, Result};
use chunk_upload_rust::{
    config::AppConfig, logging, uploader::HttpChunkTransport, ChunkTransport, UploadCommand,
    UploadEvent, UploadOptions, UploadWorker,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

/// 解析命令行参数: <文件路径> <上传端点> [最大并发分片数]
fn parse_args(default_concurrency: usize) -> Result<(PathBuf, UploadOptions)> {
    let mut args = std::env::args().skip(1);

    let path = args
        .next()
        .map(PathBuf::from)
        .context("用法: chunk-upload-rust <文件路径> <上传端点> [最大并发分片数]")?;
    let endpoint = args.next().context("缺少上传端点参数")?;
    let max_concurrency = match args.next() {
        Some(value) => value.parse().context("最大并发分片数必须是正整数")?,
        None => default_concurrency,
    };
    if max_concurrency == 0 {
        anyhow::bail!("最大并发分片数必须大于 0");
    }

    Ok((
        path,
        UploadOptions {
            endpoint,
            max_concurrency,
        },
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 先加载配置，失败时回退到默认配置
    let config = AppConfig::load_or_default(Path::new("config/app.toml")).await;

    // 初始化日志系统（必须保持 _log_guard 存活）
    let _log_guard = logging::init_logging(&config.log);

    let (path, options) = parse_args(config.upload.max_concurrency)?;

    info!(
        "准备上传: 文件={:?}, 端点={}, 分片大小={}MB, 并发={}",
        path, options.endpoint, config.upload.chunk_size_mb, options.max_concurrency
    );

    let transport: Arc<dyn ChunkTransport> =
        Arc::new(HttpChunkTransport::new(Duration::from_secs(60))?);

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let worker = Arc::new(UploadWorker::new(
        config.upload.chunk_size(),
        Duration::from_secs(config.upload.group_timeout_secs),
        transport,
        event_tx,
    ));

    let command_loop = Arc::clone(&worker);
    tokio::spawn(async move {
        command_loop.run(command_rx).await;
    });

    command_tx
        .send(UploadCommand::SelectFile { path, options })
        .context("发送 select_file 命令失败")?;

    // 驱动 ready -> start_upload，随后等待传输结束
    while let Some(event) = event_rx.recv().await {
        match event {
            UploadEvent::Ready {
                job_id,
                filename,
                chunk_count,
                full_hash,
                sample_hash,
            } => {
                info!(
                    "任务就绪: id={}, 文件={}, 分片数={}, 采样指纹={}",
                    job_id, filename, chunk_count, sample_hash
                );
                println!("full_hash: {}", full_hash);
                command_tx
                    .send(UploadCommand::StartUpload { job_id })
                    .context("发送 start_upload 命令失败")?;
            }
            UploadEvent::Progress {
                group_count,
                completed_chunk_indices,
                ..
            } => {
                info!(
                    "分组完成: 共 {} 组, 本组分片 {:?}",
                    group_count, completed_chunk_indices
                );
            }
            UploadEvent::Finish { job_id, elapsed_ms } => {
                info!("上传完成: id={}, 耗时 {}ms", job_id, elapsed_ms);
                break;
            }
            UploadEvent::Failed {
                job_id,
                kind,
                error: message,
            } => {
                error!("上传失败: id={}, 类别={}, 错误={}", job_id, kind, message);
                anyhow::bail!("上传失败 ({}): {}", kind, message);
            }
        }
    }

    Ok(())
}
