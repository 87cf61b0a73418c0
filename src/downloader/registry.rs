use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::error::DownloadError;
use super::models::{DownloadTask, TaskStatus};

// 任务注册表：进程内唯一的任务集合。
// 所有结构性修改（插入、移除）都经由同一把锁串行化，
// 完成回调与用户控制命令不会互相踩踏。
// 遍历顺序为插入顺序，重启后的顺序取决于持久化层，不作跨重启保证
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    order: Vec<i64>,
    tasks: DashMap<i64, Arc<Mutex<DownloadTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                order: Vec::new(),
                tasks: DashMap::new(),
            }),
        }
    }

    pub async fn register(
        &self,
        task: DownloadTask,
    ) -> Result<Arc<Mutex<DownloadTask>>, DownloadError> {
        let mut inner = self.inner.lock().await;

        if inner.tasks.contains_key(&task.id) {
            return Err(DownloadError::TaskAlreadyExists(task.id));
        }

        let id = task.id;
        let handle = Arc::new(Mutex::new(task));
        inner.tasks.insert(id, Arc::clone(&handle));
        inner.order.push(id);

        Ok(handle)
    }

    pub async fn unregister(&self, task_id: i64) -> Option<Arc<Mutex<DownloadTask>>> {
        let mut inner = self.inner.lock().await;
        inner.order.retain(|&id| id != task_id);
        inner.tasks.remove(&task_id).map(|(_, handle)| handle)
    }

    pub async fn get(&self, task_id: i64) -> Option<Arc<Mutex<DownloadTask>>> {
        let inner = self.inner.lock().await;
        inner.tasks.get(&task_id).map(|entry| Arc::clone(&entry))
    }

    // 按插入顺序返回所有任务句柄
    pub async fn snapshot(&self) -> Vec<(i64, Arc<Mutex<DownloadTask>>)> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id).map(|entry| (*id, Arc::clone(&entry))))
            .collect()
    }

    // 按插入顺序返回所有任务状态
    pub async fn statuses(&self) -> Vec<(i64, TaskStatus)> {
        let handles = self.snapshot().await;

        let mut result = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let status = handle.lock().await.status;
            result.push((id, status));
        }
        result
    }

    // 当前处于下载中的任务数，并发上限以此为准
    pub async fn downloading_count(&self) -> usize {
        self.count_where(|s| s == TaskStatus::Downloading).await
    }

    pub async fn count_where(&self, pred: impl Fn(TaskStatus) -> bool) -> usize {
        self.statuses()
            .await
            .into_iter()
            .filter(|&(_, s)| pred(s))
            .count()
    }

    pub async fn ids_where(&self, pred: impl Fn(TaskStatus) -> bool) -> Vec<i64> {
        self.statuses()
            .await
            .into_iter()
            .filter(|&(_, s)| pred(s))
            .map(|(id, _)| id)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
