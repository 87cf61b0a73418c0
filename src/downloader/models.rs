use rand::Rng;
use serde::Serialize;
use serde_derive::Deserialize;

// 清晰度与编码相关的常量，取值与B站 API 对齐
pub const VIDEO_QUALITY_AUTO: i32 = 200; // 自动，选取最高可用清晰度
pub const VIDEO_QUALITY_FLOOR: i32 = 16; // 流畅 360P
pub const AUDIO_QUALITY_HIGHEST: i32 = 30300; // 最高音质（尝试无损/杜比）
pub const AUDIO_QUALITY_FLOOR: i32 = 30216; // 64K
pub const AUDIO_QUALITY_HIRES: i32 = 30251; // 无损 Hi-RES
pub const AUDIO_QUALITY_DOLBY: i32 = 30250; // 杜比全景声
pub const VIDEO_CODEC_AVC: i32 = 7; // 编码兜底值 H.264
pub const VIDEO_CODEC_HEVC: i32 = 12;
pub const VIDEO_CODEC_AV1: i32 = 13;

// 任务状态机，见 TaskScheduler 的转移规则
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    Downloading,
    Paused,
    Merging,
    Finished,
    DownloadFailed,
    MergeFailed,
}

impl TaskStatus {
    // 任务是否仍然存活（未进入终态）
    pub fn is_alive(&self) -> bool {
        matches!(
            self,
            TaskStatus::Waiting | TaskStatus::Downloading | TaskStatus::Paused
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MergeType {
    #[default]
    All, // 音视频均下载，FFmpeg 合成
    VideoOnly, // 仅视频，直接重命名
    AudioOnly, // 仅音频，重命名或转换容器
}

// 音频容器类型，决定临时文件扩展名与合成分支
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AudioContainer {
    #[default]
    Mp3,
    Flac, // 无损
    Ec3,  // 杜比
}

impl AudioContainer {
    pub fn ext(&self) -> &'static str {
        match self {
            AudioContainer::Mp3 => "mp3",
            AudioContainer::Flac => "flac",
            AudioContainer::Ec3 => "ec3",
        }
    }
}

// 内容标识，bvid + cid 唯一确定一个视频流，番剧另带 ep_id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ContentRef {
    pub bvid: String,
    pub aid: i64,
    pub cid: i64,
    #[serde(default)]
    pub ep_id: Option<i64>,
}

impl ContentRef {
    // 番剧走 pgc 接口，普通视频走 x/player 接口
    pub fn is_bangumi(&self) -> bool {
        self.ep_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpInfo {
    pub name: String,
    pub mid: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: i64,
    pub title: String,
    pub content: ContentRef,

    pub video_quality_id: i32,
    pub audio_quality_id: i32,
    pub video_codec_id: i32,
    pub merge_type: MergeType,
    #[serde(default)]
    pub audio_container: AudioContainer,

    pub status: TaskStatus,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub completed_size: u64,
    #[serde(default)]
    pub progress: i32,

    // 批量下载时的序号，0 表示单个任务
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub timestamp: i64,

    pub referer_url: String,
    #[serde(default)]
    pub cover_url: String,
    #[serde(default)]
    pub up_info: UpInfo,

    // 最近一次合成失败的日志，供界面查看
    #[serde(default)]
    pub merge_error_log: Option<String>,
}

impl DownloadTask {
    pub fn new(title: String, content: ContentRef, referer_url: String) -> Self {
        Self {
            id: rand::rng().random_range(100_000_000..i64::MAX),
            title,
            content,
            video_quality_id: VIDEO_QUALITY_AUTO,
            audio_quality_id: AUDIO_QUALITY_HIGHEST,
            video_codec_id: VIDEO_CODEC_AVC,
            merge_type: MergeType::All,
            audio_container: AudioContainer::Mp3,
            status: TaskStatus::Waiting,
            total_size: 0,
            completed_size: 0,
            progress: 0,
            index: 0,
            timestamp: chrono::Utc::now().timestamp(),
            referer_url,
            cover_url: String::new(),
            up_info: UpInfo::default(),
            merge_error_log: None,
        }
    }

    // 下载是否已经完成（字节数已对齐）
    pub fn download_finished(&self) -> bool {
        self.total_size > 0 && self.completed_size >= self.total_size
    }

    pub fn video_temp_name(&self) -> String {
        format!("video_{}.mp4", self.id)
    }

    pub fn audio_temp_name(&self) -> String {
        format!("audio_{}.{}", self.id, self.audio_container.ext())
    }
}

// 单个流的下载计划：按序尝试的镜像地址与目标临时文件名
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpec {
    pub kind: StreamKind,
    pub mirrors: Vec<String>,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

// 解析成功后得到的完整下载计划，非空
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub chunks: Vec<ChunkSpec>,
}

impl ChunkPlan {
    pub fn chunk(&self, kind: StreamKind) -> Option<&ChunkSpec> {
        self.chunks.iter().find(|c| c.kind == kind)
    }
}
