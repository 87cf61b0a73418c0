use std::path::PathBuf;

use super::models::TaskStatus;

// 下载核心对展示层的回调接口，展示层不在本 crate 范围内，
// 任何实现了该 trait 的对象都可以接收任务事件
pub trait TaskEvents: Send + Sync {
    // 首次拿到文件总大小
    fn on_start(&self, task_id: i64, total_size: u64) {
        let _ = (task_id, total_size);
    }

    // 周期性进度：累计字节数、整数百分比、速度文本
    fn on_progress(&self, task_id: i64, completed_size: u64, percent: i32, speed_text: &str) {
        let _ = (task_id, completed_size, percent, speed_text);
    }

    // 暂停/恢复等状态变化
    fn on_pause_state_changed(&self, task_id: i64, status: TaskStatus) {
        let _ = (task_id, status);
    }

    fn on_merge_start(&self, task_id: i64) {
        let _ = task_id;
    }

    fn on_merge_complete(&self, task_id: i64, output_files: &[PathBuf]) {
        let _ = (task_id, output_files);
    }

    fn on_merge_failed(&self, task_id: i64, log: &str) {
        let _ = (task_id, log);
    }

    fn on_download_failed(&self, task_id: i64) {
        let _ = task_id;
    }
}

pub struct NoopEvents;

impl TaskEvents for NoopEvents {}
