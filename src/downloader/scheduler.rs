use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::api::client::DownloadClient;
use crate::post_process::merger::{MergeOptions, MergeStage};
use crate::resolver::MediaResolver;

use super::engine::{TransferContext, TransferEngine, TransferOutcome};
use super::error::DownloadError;
use super::events::TaskEvents;
use super::models::{DownloadTask, TaskStatus};
use super::registry::TaskRegistry;
use super::store::PersistenceStore;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    // 下载目录，临时文件与最终产物都在这里
    pub work_dir: PathBuf,
    // 并发下载上限，运行期可调
    pub concurrency: usize,
    pub merge: MergeOptions,
}

// 展示层下发的批量控制动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Pause,
    Resume,
    Stop { delete_files: bool },
}

// 单个任务的控制令牌。条目存在即表示该任务有一个正在执行的操作，
// 同一任务不会同时存在传输与合成两个工作单元
struct TaskHandles {
    pause: CancellationToken,
    stop: CancellationToken,
}

// 任务调度器：在并发上限内放行等待任务，驱动
// 解析 -> 传输 -> 合成 的完整流水线，并把每条边落盘
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    registry: TaskRegistry,
    store: PersistenceStore,
    client: DownloadClient,
    events: Arc<dyn TaskEvents>,
    config: Mutex<SchedulerConfig>,
    handles: DashMap<i64, TaskHandles>,
}

impl Clone for TaskScheduler {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: PersistenceStore,
        client: DownloadClient,
        events: Arc<dyn TaskEvents>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                registry: TaskRegistry::new(),
                store,
                client,
                events,
                config: Mutex::new(config),
                handles: DashMap::new(),
            }),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    // 启动时恢复历史任务。持久层已把 Downloading 降级为 Paused
    pub async fn load_history(&self) -> Result<usize, DownloadError> {
        let tasks = self.inner.store.load_all().await?;
        let count = tasks.len();

        for task in tasks {
            self.inner.registry.register(task).await?;
        }

        Ok(count)
    }

    // 注册新任务并写入完整快照，任务进入 Waiting
    pub async fn add_task(&self, task: DownloadTask) -> Result<i64, DownloadError> {
        let id = task.id;
        self.inner.store.save(&task).await?;
        self.inner.registry.register(task).await?;
        Ok(id)
    }

    // 放行等待中的任务，直到并发数达到上限。只在准入时刻比较上限，
    // 不会抢占已经在下载的任务
    pub async fn admit(&self) {
        let limit = self.inner.config.lock().await.concurrency;

        for (id, handle) in self.inner.registry.snapshot().await {
            if self.inner.registry.downloading_count().await >= limit {
                break;
            }

            let status = handle.lock().await.status;
            if status == TaskStatus::Waiting {
                self.start(id).await;
            }
        }
    }

    // 调整并发上限并立即重新评估准入
    pub async fn set_concurrency_limit(&self, limit: usize) {
        {
            let mut config = self.inner.config.lock().await;
            config.concurrency = limit;
        }
        info!("并发上限调整为 {}", limit);
        self.admit().await;
    }

    // 对状态满足条件的全部任务执行同一控制动作，每个任务恰好访问一次
    pub async fn apply_to_filtered(
        &self,
        pred: impl Fn(TaskStatus) -> bool,
        action: ControlAction,
    ) {
        for id in self.inner.registry.ids_where(pred).await {
            match action {
                ControlAction::Pause => self.pause(id).await,
                ControlAction::Resume => self.resume(id).await,
                ControlAction::Stop { delete_files } => self.stop(id, delete_files).await,
            }
        }
    }

    // 恢复所有暂停的任务，合成失败的任务一并重试
    pub async fn start_all(&self) {
        self.apply_to_filtered(
            |s| matches!(s, TaskStatus::Paused | TaskStatus::MergeFailed),
            ControlAction::Resume,
        )
        .await;
        self.admit().await;
    }

    pub async fn pause_all(&self) {
        self.apply_to_filtered(|s| s == TaskStatus::Downloading, ControlAction::Pause)
            .await;
    }

    pub async fn stop_all(&self) {
        self.apply_to_filtered(
            |s| s.is_alive(),
            ControlAction::Stop { delete_files: true },
        )
        .await;
    }

    // 开始下载一个任务。同一任务最多一个活动操作
    pub async fn start(&self, task_id: i64) {
        let Some((pause, stop)) = self.claim(task_id) else {
            debug!("任务 {} 已有活动操作，忽略重复启动", task_id);
            return;
        };

        let Some(handle) = self.inner.registry.get(task_id).await else {
            self.inner.handles.remove(&task_id);
            return;
        };

        {
            let mut task = handle.lock().await;
            if !matches!(task.status, TaskStatus::Waiting | TaskStatus::Paused) {
                drop(task);
                self.inner.handles.remove(&task_id);
                return;
            }
            task.status = TaskStatus::Downloading;
        }
        let _ = self
            .inner
            .store
            .update_fields(task_id, json!({ "status": TaskStatus::Downloading }))
            .await;
        self.inner
            .events
            .on_pause_state_changed(task_id, TaskStatus::Downloading);

        let this = self.clone();
        tokio::spawn(async move {
            this.transfer_worker(task_id, pause, stop).await;
        });
    }

    // admit 的 Box 化版本，用于断开 transfer_worker -> admit -> start
    // 形成的 async 递归 Send 推导环
    fn admit_boxed(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(self.admit())
    }

    // 原子地占住任务的活动操作名额，已被占用时返回 None
    fn claim(&self, task_id: i64) -> Option<(CancellationToken, CancellationToken)> {
        match self.inner.handles.entry(task_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let handles = TaskHandles {
                    pause: CancellationToken::new(),
                    stop: CancellationToken::new(),
                };
                let tokens = (handles.pause.clone(), handles.stop.clone());
                entry.insert(handles);
                Some(tokens)
            }
        }
    }

    // 暂停下载中的任务，在最近的 I/O 边界协作停下并刷盘
    pub async fn pause(&self, task_id: i64) {
        let Some(entry) = self.inner.handles.get(&task_id) else {
            return;
        };
        entry.pause.cancel();
    }

    // 恢复任务：未完成则续传，字节齐了直接进入合成，
    // 合成失败的任务重试合成
    pub async fn resume(&self, task_id: i64) {
        let Some(handle) = self.inner.registry.get(task_id).await else {
            return;
        };

        let (status, finished) = {
            let task = handle.lock().await;
            (task.status, task.download_finished())
        };

        match status {
            TaskStatus::Paused if finished => self.spawn_merge(task_id).await,
            TaskStatus::Paused | TaskStatus::Waiting => self.start(task_id).await,
            TaskStatus::MergeFailed => self.spawn_merge(task_id).await,
            _ => {}
        }
    }

    // 终止并移除任务。记录一并清除，可选删除临时文件
    pub async fn stop(&self, task_id: i64, delete_files: bool) {
        if let Some((_, handles)) = self.inner.handles.remove(&task_id) {
            handles.stop.cancel();
        }

        let Some(handle) = self.inner.registry.unregister(task_id).await else {
            return;
        };

        let _ = self.inner.store.clear(task_id).await;

        if delete_files {
            let (video_name, audio_name) = {
                let task = handle.lock().await;
                (task.video_temp_name(), task.audio_temp_name())
            };
            let work_dir = self.inner.config.lock().await.work_dir.clone();
            let _ = tokio::fs::remove_file(work_dir.join(video_name)).await;
            let _ = tokio::fs::remove_file(work_dir.join(audio_name)).await;
        }

        info!("任务 {} 已移除", task_id);
    }

    // 等到没有任务处于活动状态，供命令行入口与测试使用
    pub async fn wait_idle(&self) {
        loop {
            let busy = self
                .inner
                .registry
                .count_where(|s| {
                    matches!(
                        s,
                        TaskStatus::Waiting | TaskStatus::Downloading | TaskStatus::Merging
                    )
                })
                .await;

            if busy == 0 && self.inner.handles.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    // ---- 工作单元 ----

    async fn transfer_worker(&self, task_id: i64, pause: CancellationToken, stop: CancellationToken) {
        let outcome = self.run_transfer(task_id, pause, stop).await;
        self.inner.handles.remove(&task_id);

        match outcome {
            Ok(TransferOutcome::Completed) => {
                self.spawn_merge(task_id).await;
                // 让出名额给下一个等待任务。
                // Box 化递归调用以断开 async 递归带来的 Send 推导环
                self.admit_boxed().await;
            }
            Ok(TransferOutcome::Paused) => {
                self.mark_status(task_id, TaskStatus::Paused).await;
                self.inner
                    .events
                    .on_pause_state_changed(task_id, TaskStatus::Paused);
            }
            Ok(TransferOutcome::Stopped) => {
                // stop() 已负责清理
                debug!("任务 {} 传输被取消", task_id);
            }
            Err(e) => {
                warn!("任务 {} 下载失败: {}", task_id, e);
                self.mark_status(task_id, TaskStatus::DownloadFailed).await;
                self.inner.events.on_download_failed(task_id);
                self.admit_boxed().await;
            }
        }
    }

    async fn run_transfer(
        &self,
        task_id: i64,
        pause: CancellationToken,
        stop: CancellationToken,
    ) -> Result<TransferOutcome, DownloadError> {
        let handle = self
            .inner
            .registry
            .get(task_id)
            .await
            .ok_or(DownloadError::TaskNotFound(task_id))?;

        // 解析出镜像计划；协商结果写回任务并落盘。
        // 解析失败不触碰文件系统
        let resolver = MediaResolver::new(self.inner.client.clone());
        let mut task_copy = { handle.lock().await.clone() };
        let plan = resolver.resolve(&mut task_copy).await?;

        {
            let mut task = handle.lock().await;
            task.video_quality_id = task_copy.video_quality_id;
            task.audio_quality_id = task_copy.audio_quality_id;
            task.video_codec_id = task_copy.video_codec_id;
            task.merge_type = task_copy.merge_type;
            task.audio_container = task_copy.audio_container;
        }

        self.inner
            .store
            .update_fields(
                task_id,
                json!({
                    "video_quality_id": task_copy.video_quality_id,
                    "audio_quality_id": task_copy.audio_quality_id,
                    "video_codec_id": task_copy.video_codec_id,
                }),
            )
            .await?;

        let work_dir = self.inner.config.lock().await.work_dir.clone();
        tokio::fs::create_dir_all(&work_dir).await?;

        let ctx = TransferContext {
            task: Arc::clone(&handle),
            plan,
            tmp_dir: work_dir,
            pause,
            stop,
            events: Arc::clone(&self.inner.events),
            store: self.inner.store.clone(),
        };

        let engine = TransferEngine::new(self.inner.client.clone());
        engine.download(&ctx).await
    }

    // 传输完成或用户重试后进入合成阶段，合成与传输互斥
    async fn spawn_merge(&self, task_id: i64) {
        if self.claim(task_id).is_none() {
            debug!("任务 {} 已有活动操作，忽略合成请求", task_id);
            return;
        }

        self.mark_status(task_id, TaskStatus::Merging).await;
        self.inner.events.on_merge_start(task_id);

        let this = self.clone();
        tokio::spawn(async move {
            this.merge_worker(task_id).await;
            this.inner.handles.remove(&task_id);
        });
    }

    async fn merge_worker(&self, task_id: i64) {
        let Some(handle) = self.inner.registry.get(task_id).await else {
            return;
        };

        let (task_snapshot, work_dir, merge_opts) = {
            let task = handle.lock().await;
            let config = self.inner.config.lock().await;
            (task.clone(), config.work_dir.clone(), config.merge.clone())
        };

        match MergeStage::run(&task_snapshot, &work_dir, &merge_opts).await {
            Ok(outputs) => {
                {
                    let mut task = handle.lock().await;
                    task.status = TaskStatus::Finished;
                    task.progress = 100;
                    task.merge_error_log = None;
                }
                // 完成的任务不再需要恢复记录
                let _ = self.inner.store.clear(task_id).await;
                self.inner.events.on_merge_complete(task_id, &outputs);
                info!("任务 {} 下载完成", task_id);
            }
            Err(failure) => {
                let log = failure.diagnostics.log_text();
                {
                    let mut task = handle.lock().await;
                    task.status = TaskStatus::MergeFailed;
                    task.merge_error_log = Some(log.clone());
                }
                let _ = self
                    .inner
                    .store
                    .update_fields(
                        task_id,
                        json!({
                            "status": TaskStatus::MergeFailed,
                            "merge_error_log": log,
                        }),
                    )
                    .await;
                self.inner.events.on_merge_failed(task_id, &log);
                warn!("任务 {} 合成失败，源文件保留以供重试", task_id);
            }
        }
    }

    async fn mark_status(&self, task_id: i64, status: TaskStatus) {
        if let Some(handle) = self.inner.registry.get(task_id).await {
            handle.lock().await.status = status;
        }
        let _ = self
            .inner
            .store
            .update_fields(task_id, json!({ "status": status }))
            .await;
    }
}
