use std::collections::VecDeque;
use std::time::{Duration, Instant};

// 速度计算的滑动窗口长度
const SPEED_WINDOW: Duration = Duration::from_secs(3);

// 下载速度计：在短滑动窗口内对字节增量求平均
pub struct SpeedMeter {
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedMeter {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::new(),
        }
    }

    // 记录一次累计字节数采样
    pub fn record(&mut self, completed: u64) {
        let now = Instant::now();
        self.samples.push_back((now, completed));

        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > SPEED_WINDOW && self.samples.len() > 2 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    // 当前窗口内的平均速度，单位字节/秒
    pub fn bytes_per_sec(&self) -> u64 {
        let (Some(&(t0, b0)), Some(&(t1, b1))) = (self.samples.front(), self.samples.back())
        else {
            return 0;
        };

        let elapsed = t1.duration_since(t0).as_secs_f64();
        if elapsed <= f64::EPSILON || b1 <= b0 {
            return 0;
        }

        ((b1 - b0) as f64 / elapsed) as u64
    }

    pub fn speed_text(&self) -> String {
        format!("{}/s", format_size(self.bytes_per_sec()))
    }
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}

// 人类可读的文件大小
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let bytes = bytes as f64;

    if bytes >= GB {
        format!("{:.2} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes / KB)
    } else {
        format!("{} B", bytes as u64)
    }
}

// 整数百分比，向下取整
pub fn percent(completed: u64, total: u64) -> i32 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).floor() as i32
}
