use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use super::error::DownloadError;
use super::models::{DownloadTask, TaskStatus};

// 任务持久化：每个任务一个 {id}.json 记录文件，重启后恢复
#[derive(Debug, Clone)]
pub struct PersistenceStore {
    dir: PathBuf,
}

impl PersistenceStore {
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self, DownloadError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn record_path(&self, task_id: i64) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    // 先写临时文件再改名。进程在写一半时崩溃只会留下残缺的
    // 临时文件，正式记录要么是旧内容要么是新内容
    async fn write_record(&self, path: &Path, data: Vec<u8>) -> Result<(), DownloadError> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    // 写入完整任务快照
    pub async fn save(&self, task: &DownloadTask) -> Result<(), DownloadError> {
        let data = serde_json::to_vec_pretty(task)
            .map_err(|e| DownloadError::InvalidState(e.to_string()))?;
        self.write_record(&self.record_path(task.id), data).await
    }

    // 增量更新：仅合并给定字段，不触碰记录中的其他字段
    pub async fn update_fields(&self, task_id: i64, patch: Value) -> Result<(), DownloadError> {
        let path = self.record_path(task_id);

        let mut record: Value = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data).unwrap_or(Value::Object(Default::default())),
            Err(_) => Value::Object(Default::default()),
        };

        let (Value::Object(record_map), Value::Object(patch_map)) = (&mut record, patch) else {
            return Err(DownloadError::InvalidState(
                "持久化补丁必须是 JSON 对象".to_string(),
            ));
        };

        for (key, value) in patch_map {
            record_map.insert(key, value);
        }

        let data = serde_json::to_vec_pretty(&record)
            .map_err(|e| DownloadError::InvalidState(e.to_string()))?;
        self.write_record(&path, data).await
    }

    // 启动时加载全部记录。处于 Downloading 的任务一律降级为 Paused，
    // 上一次进程的文件句柄状态未知，直接续传有损坏风险
    pub async fn load_all(&self) -> Result<Vec<DownloadTask>, DownloadError> {
        let mut tasks = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("读取任务记录失败，跳过: {:?} ({})", path, e);
                    continue;
                }
            };

            // 未知字段忽略，缺失字段取默认值；坏记录跳过而不中断启动
            match serde_json::from_slice::<DownloadTask>(&data) {
                Ok(mut task) => {
                    if task.status == TaskStatus::Downloading {
                        debug!("任务 {} 上次退出时仍在下载，降级为暂停", task.id);
                        task.status = TaskStatus::Paused;
                    }
                    tasks.push(task);
                }
                Err(e) => {
                    warn!("任务记录损坏，跳过: {:?} ({})", path, e);
                }
            }
        }

        Ok(tasks)
    }

    // 删除记录，用于取消任务或清理已完成历史
    pub async fn clear(&self, task_id: i64) -> Result<(), DownloadError> {
        let path = self.record_path(task_id);
        match tokio::fs::remove_file(&path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
