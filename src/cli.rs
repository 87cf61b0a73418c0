use clap::Parser;
use std::path::PathBuf;

/// B站视频下载任务管理器
#[derive(Parser, Debug)]
#[command(name = "bilidm")]
#[command(version = "1.0")]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "B站视频下载器：并发调度、断点续传、FFmpeg 合成", long_about = None)]
pub struct Cli {
    /// 视频链接，可指定多个 (支持普通视频和番剧)
    #[arg(long, value_name = "URL")]
    #[arg(value_hint = clap::ValueHint::Url)]
    #[arg(num_args = 1..)]
    pub url: Vec<String>,

    /// 视频保存目录
    #[arg(long, value_name = "DIR")]
    #[arg(default_value = "./downloads")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// 任务记录目录，断点信息保存在这里
    #[arg(long, value_name = "DIR")]
    #[arg(default_value = "./downloads/.tasks")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub record_dir: PathBuf,

    /// 视频质量
    #[arg(long, value_name = "QUALITY")]
    #[arg(default_value = "200")]
    #[arg(help = "视频质量: 200=自动取最高, 120=4K, 80=1080P, 64=720P, 32=480P, 16=360P")]
    pub quality: i32,

    /// 视频编码
    #[arg(long, value_name = "CODEC")]
    #[arg(default_value = "7")]
    #[arg(help = "视频编码: 7=AVC, 12=HEVC, 13=AV1；无匹配时自动回退")]
    pub codec: i32,

    /// 音质
    #[arg(long, value_name = "QUALITY")]
    #[arg(default_value = "30300")]
    #[arg(help = "音质: 30300=最高(尝试无损/杜比), 30280=192K, 30232=132K, 30216=64K")]
    pub audio_quality: i32,

    /// 并发下载数量
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub concurrency: usize,

    /// 仅下载音频
    #[arg(long, default_value_t = false)]
    pub audio_only: bool,

    /// 仅下载视频
    #[arg(long, default_value_t = false)]
    pub video_only: bool,

    /// 合成成功后保留音视频源文件
    #[arg(long, default_value_t = false)]
    pub keep_sources: bool,

    /// 把无损音频统一转为 flac 容器
    #[arg(long, default_value_t = false)]
    pub standardize_lossless: bool,

    /// 输出文件名附带序号前缀
    #[arg(long, default_value_t = false)]
    pub numbering: bool,

    /// FFmpeg 可执行文件路径
    #[arg(long, value_name = "PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: String,

    /// 启动时恢复上次未完成的任务
    #[arg(long, default_value_t = false)]
    pub resume: bool,
}
