use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use dashmap::DashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use bili_download_manager::downloader::events::TaskEvents;
use bili_download_manager::downloader::models::{ContentRef, DownloadTask, MergeType, TaskStatus};
use bili_download_manager::downloader::scheduler::{SchedulerConfig, TaskScheduler};
use bili_download_manager::downloader::store::PersistenceStore;
use bili_download_manager::common::api::client::DownloadClient;
use bili_download_manager::post_process::merger::MergeOptions;
use bili_download_manager::resolver::{parse_url, MediaResolver};
use bili_download_manager::Result;

mod cli;

/// 终端进度条展示，每个任务一条
struct ProgressReporter {
    multi: MultiProgress,
    bars: DashMap<i64, ProgressBar>,
}

impl ProgressReporter {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: DashMap::new(),
        }
    }

    fn bar(&self, task_id: i64, total: u64) -> ProgressBar {
        if let Some(bar) = self.bars.get(&task_id) {
            return bar.clone();
        }

        let bar = self.multi.add(ProgressBar::new(total));
        bar.set_style(
            ProgressStyle::with_template(
                "{prefix} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_prefix(format!("任务 {}", task_id));
        self.bars.insert(task_id, bar.clone());
        bar
    }
}

impl TaskEvents for ProgressReporter {
    fn on_start(&self, task_id: i64, total_size: u64) {
        self.bar(task_id, total_size).set_length(total_size);
    }

    fn on_progress(&self, task_id: i64, completed_size: u64, _percent: i32, speed_text: &str) {
        if let Some(bar) = self.bars.get(&task_id) {
            bar.set_position(completed_size);
            bar.set_message(speed_text.to_string());
        }
    }

    fn on_pause_state_changed(&self, task_id: i64, status: TaskStatus) {
        if status == TaskStatus::Paused {
            if let Some(bar) = self.bars.get(&task_id) {
                bar.set_message("已暂停".to_string());
            }
        }
    }

    fn on_merge_start(&self, task_id: i64) {
        if let Some(bar) = self.bars.get(&task_id) {
            bar.set_message("合成中...".to_string());
        }
    }

    fn on_merge_complete(&self, task_id: i64, output_files: &[std::path::PathBuf]) {
        if let Some((_, bar)) = self.bars.remove(&task_id) {
            bar.finish_with_message("完成".green().to_string());
        }
        for file in output_files {
            info!("产物: {:?}", file);
        }
    }

    fn on_merge_failed(&self, task_id: i64, log: &str) {
        if let Some((_, bar)) = self.bars.remove(&task_id) {
            bar.abandon_with_message("合成失败".red().to_string());
        }
        error!("任务 {} 合成失败:\n{}", task_id, log);
    }

    fn on_download_failed(&self, task_id: i64) {
        if let Some((_, bar)) = self.bars.remove(&task_id) {
            bar.abandon_with_message("下载失败".red().to_string());
        }
    }
}

/// 从链接解析出任务，协商参数取命令行配置
async fn build_task(
    resolver: &MediaResolver,
    args: &cli::Cli,
    url: &str,
    index: u32,
) -> Result<DownloadTask> {
    let url_ref = parse_url(url)?;
    let view = resolver.resolve_view(&url_ref).await?;

    let mut task = DownloadTask::new(
        view.title.clone(),
        ContentRef {
            bvid: view.bvid.clone(),
            aid: view.aid,
            cid: view.cid,
            ep_id: None,
        },
        url.to_string(),
    );

    task.video_quality_id = args.quality;
    task.audio_quality_id = args.audio_quality;
    task.video_codec_id = args.codec;
    task.cover_url = view.pic.clone();
    task.index = index;
    if let Some(owner) = &view.owner {
        task.up_info.name = owner.name.clone();
        task.up_info.mid = owner.mid;
    }

    if args.audio_only {
        task.merge_type = MergeType::AudioOnly;
    } else if args.video_only {
        task.merge_type = MergeType::VideoOnly;
    }

    info!("解析成功: << {} >>", task.title);
    Ok(task)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = cli::Cli::parse();

    if args.url.is_empty() && !args.resume {
        return Err("请通过 --url 指定至少一个视频链接，或使用 --resume 恢复历史任务".into());
    }

    tokio::fs::create_dir_all(&args.output_dir).await?;

    let client = DownloadClient::new();
    let store = PersistenceStore::new(args.record_dir.clone()).await?;
    let reporter = Arc::new(ProgressReporter::new());

    let scheduler = TaskScheduler::new(
        SchedulerConfig {
            work_dir: args.output_dir.clone(),
            concurrency: args.concurrency,
            merge: MergeOptions {
                ffmpeg_path: args.ffmpeg_path.clone(),
                keep_sources: args.keep_sources,
                standardize_lossless: args.standardize_lossless,
                numbering: args.numbering,
            },
        },
        store,
        client.clone(),
        reporter,
    );

    // 恢复历史任务，下载中的任务已被降级为暂停态
    if args.resume {
        let restored = scheduler.load_history().await?;
        if restored > 0 {
            info!("恢复了 {} 个历史任务", restored);
            scheduler.start_all().await;
        } else {
            warn!("没有可恢复的历史任务");
        }
    }

    // 登记新任务
    let resolver = MediaResolver::new(client.clone());
    let numbering = args.url.len() > 1;
    for (i, url) in args.url.iter().enumerate() {
        let index = if numbering { i as u32 + 1 } else { 0 };
        match build_task(&resolver, &args, url, index).await {
            Ok(task) => {
                scheduler.add_task(task).await?;
            }
            Err(e) => {
                error!("解析 {} 失败: {}", url, e);
            }
        }
    }

    scheduler.admit().await;
    scheduler.wait_idle().await;

    // 汇总结果
    let mut finished = 0usize;
    let mut failed: Vec<(i64, TaskStatus)> = Vec::new();
    for (id, status) in scheduler.registry().statuses().await {
        match status {
            TaskStatus::Finished => finished += 1,
            TaskStatus::DownloadFailed | TaskStatus::MergeFailed => failed.push((id, status)),
            _ => {}
        }
    }

    println!();
    println!("{} {} 个任务", "完成".green(), finished);
    if !failed.is_empty() {
        for (id, status) in &failed {
            let reason = match status {
                TaskStatus::DownloadFailed => "下载失败",
                _ => "合成失败，任务记录已保留，可用 --resume 重试",
            };
            println!("{} 任务 {}: {}", "失败".red(), id, reason);
        }
        return Err("部分任务未完成".into());
    }

    println!("{}", "全部下载完成！".green());
    Ok(())
}
