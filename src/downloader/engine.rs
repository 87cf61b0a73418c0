use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::common::api::client::DownloadClient;
use crate::common::api::error::ApiError;

use super::error::DownloadError;
use super::events::TaskEvents;
use super::models::{ChunkPlan, ChunkSpec, DownloadTask};
use super::progress::{SpeedMeter, percent};
use super::store::PersistenceStore;

// 进度通知与持久化的节流间隔
const PROGRESS_TICK: Duration = Duration::from_millis(500);

// 一次传输的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    // 全部分块下载完成
    Completed,
    // 用户暂停，已写入的字节已落盘
    Paused,
    // 用户取消，由调用方决定是否删除临时文件
    Stopped,
}

// 单个任务的传输上下文，由调度器装配
pub struct TransferContext {
    pub task: Arc<Mutex<DownloadTask>>,
    pub plan: ChunkPlan,
    pub tmp_dir: PathBuf,
    // 暂停信号：在每个读写点检查，触发后刷盘退出
    pub pause: CancellationToken,
    // 取消信号：尽快放弃当前 I/O
    pub stop: CancellationToken,
    pub events: Arc<dyn TaskEvents>,
    pub store: PersistenceStore,
}

enum StreamEnd {
    Finished,
    Paused,
    Stopped,
}

// 传输引擎：按镜像顺序做可续传的分块下载
pub struct TransferEngine {
    client: DownloadClient,
}

impl TransferEngine {
    pub fn new(client: DownloadClient) -> Self {
        Self { client }
    }

    pub async fn download(&self, ctx: &TransferContext) -> Result<TransferOutcome, DownloadError> {
        let (task_id, referer_url, known_total) = {
            let task = ctx.task.lock().await;
            (task.id, task.referer_url.clone(), task.total_size)
        };

        // 每个分块的断点位置取自临时文件当前长度
        let mut resume_offsets = Vec::with_capacity(ctx.plan.chunks.len());
        for chunk in &ctx.plan.chunks {
            resume_offsets.push(file_len(&ctx.tmp_dir.join(&chunk.file_name)).await);
        }

        // 探测各分块的远端大小，汇总出任务总大小
        let mut chunk_totals = Vec::with_capacity(ctx.plan.chunks.len());
        for (chunk, &offset) in ctx.plan.chunks.iter().zip(&resume_offsets) {
            let total = self.probe_chunk_size(chunk, offset, &referer_url).await?;
            chunk_totals.push(total);
        }
        let total_size: u64 = chunk_totals.iter().sum();

        {
            let mut task = ctx.task.lock().await;
            task.total_size = total_size;
            task.completed_size = resume_offsets.iter().sum();
        }
        ctx.store
            .update_fields(task_id, json!({ "total_size": total_size }))
            .await?;

        if known_total == 0 {
            ctx.events.on_start(task_id, total_size);
        }

        // 顺序处理各分块，镜像严格按列表顺序回退
        for ((chunk, mut offset), chunk_total) in ctx
            .plan
            .chunks
            .iter()
            .zip(resume_offsets)
            .zip(chunk_totals)
        {
            if offset >= chunk_total {
                debug!("分块 {} 已完成，跳过", chunk.file_name);
                continue;
            }

            let path = ctx.tmp_dir.join(&chunk.file_name);
            let mut finished = false;

            for url in &chunk.mirrors {
                if offset >= chunk_total {
                    finished = true;
                    break;
                }

                match self
                    .stream_one(ctx, url, &path, &mut offset, chunk_total, &referer_url)
                    .await
                {
                    Ok(StreamEnd::Finished) => {
                        finished = true;
                        break;
                    }
                    Ok(StreamEnd::Paused) => {
                        self.persist_progress(ctx, task_id).await?;
                        return Ok(TransferOutcome::Paused);
                    }
                    Ok(StreamEnd::Stopped) => {
                        return Ok(TransferOutcome::Stopped);
                    }
                    Err(e) => {
                        // 瞬时错误，顺延到下一个镜像，从当前偏移续传
                        warn!("镜像 {} 下载失败: {}，尝试下一个", url, e);
                    }
                }
            }

            if !finished && offset < chunk_total {
                self.persist_progress(ctx, task_id).await?;
                return Err(DownloadError::MirrorsExhausted(chunk.file_name.clone()));
            }
        }

        self.persist_progress(ctx, task_id).await?;
        Ok(TransferOutcome::Completed)
    }

    // 以 Range 请求探测分块绝对大小，镜像按序尝试
    async fn probe_chunk_size(
        &self,
        chunk: &ChunkSpec,
        offset: u64,
        referer_url: &str,
    ) -> Result<u64, DownloadError> {
        for url in &chunk.mirrors {
            match self.client.get_ranged(url, offset, referer_url).await {
                Ok(resp) => {
                    // 有偏移时必须是 206：忽略 Range 的镜像会把整个文件
                    // 当作剩余部分，算出来的总大小是错的
                    if offset > 0 && resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
                        warn!("镜像 {} 不支持 Range 续传，跳过", url);
                        continue;
                    }
                    if let Some(remaining) = resp.content_length() {
                        return Ok(offset + remaining);
                    }
                    warn!("镜像 {} 未返回 Content-Length", url);
                }
                // Range 超出文件末尾，说明该分块已经下载完成
                Err(ApiError::BadStatus(416)) => return Ok(offset),
                Err(e) => {
                    warn!("探测镜像 {} 失败: {}", url, e);
                }
            }
        }

        Err(DownloadError::MirrorsExhausted(chunk.file_name.clone()))
    }

    // 从单个镜像流式写入，直到分块完成、出错或收到暂停/取消信号
    async fn stream_one(
        &self,
        ctx: &TransferContext,
        url: &str,
        path: &Path,
        offset: &mut u64,
        chunk_total: u64,
        referer_url: &str,
    ) -> Result<StreamEnd, DownloadError> {
        let resp = self.client.get_ranged(url, *offset, referer_url).await?;

        // 续传只能追加在 206 响应后面，200 是完整文件而不是剩余部分
        if *offset > 0 && resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::InvalidState(format!(
                "镜像 {} 忽略了 Range 请求头",
                url
            )));
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        let mut stream = resp.bytes_stream();
        let mut meter = SpeedMeter::new();
        let mut last_tick = Instant::now();
        let task_id;
        {
            let task = ctx.task.lock().await;
            task_id = task.id;
            meter.record(task.completed_size);
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => {
                    // 取消时立即放弃，临时文件的去留由调用方处理
                    return Ok(StreamEnd::Stopped);
                }
                _ = ctx.pause.cancelled() => {
                    // 暂停前刷盘，保证已接收字节可用于续传
                    file.flush().await?;
                    file.sync_all().await?;
                    return Ok(StreamEnd::Paused);
                }
                next = stream.next() => next,
            };

            let Some(chunk_bytes) = next else {
                break;
            };

            let bytes = match chunk_bytes {
                Ok(bytes) => bytes,
                Err(e) => {
                    // 连接中断，刷盘后交给上层换镜像续传
                    file.flush().await?;
                    return Err(DownloadError::HttpError(e));
                }
            };

            file.write_all(&bytes).await?;
            *offset += bytes.len() as u64;

            let (completed, total) = {
                let mut task = ctx.task.lock().await;
                task.completed_size += bytes.len() as u64;
                (task.completed_size, task.total_size)
            };
            meter.record(completed);

            // 节流发布进度，completed_size 单调不减
            if last_tick.elapsed() >= PROGRESS_TICK {
                last_tick = Instant::now();

                let pct = percent(completed, total);
                {
                    let mut task = ctx.task.lock().await;
                    task.progress = pct;
                }

                ctx.events
                    .on_progress(task_id, completed, pct, &meter.speed_text());
                ctx.store
                    .update_fields(
                        task_id,
                        json!({ "completed_size": completed, "progress": pct }),
                    )
                    .await?;
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        if *offset >= chunk_total {
            Ok(StreamEnd::Finished)
        } else {
            // 流提前结束但未到分块末尾，按瞬时错误处理
            Err(DownloadError::InvalidState(format!(
                "镜像提前断流: {}/{} 字节",
                offset, chunk_total
            )))
        }
    }

    // 把当前进度落盘（暂停、失败与完成路径共用）
    async fn persist_progress(
        &self,
        ctx: &TransferContext,
        task_id: i64,
    ) -> Result<(), DownloadError> {
        let (completed, total) = {
            let task = ctx.task.lock().await;
            (task.completed_size, task.total_size)
        };

        let pct = percent(completed, total);
        {
            let mut task = ctx.task.lock().await;
            task.progress = pct;
        }

        ctx.store
            .update_fields(
                task_id,
                json!({ "completed_size": completed, "progress": pct }),
            )
            .await
    }
}

async fn file_len(path: &Path) -> u64 {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    }
}
