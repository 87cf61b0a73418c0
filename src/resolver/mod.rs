pub mod errors;
pub mod models;

use regex::Regex;
use tracing::debug;

use crate::common::api::client::DownloadClient;
use crate::downloader::models::{
    AUDIO_QUALITY_DOLBY, AUDIO_QUALITY_FLOOR, AUDIO_QUALITY_HIGHEST, AUDIO_QUALITY_HIRES,
    AudioContainer, ChunkPlan, ChunkSpec, ContentRef, DownloadTask, MergeType, StreamKind,
    VIDEO_CODEC_AVC, VIDEO_QUALITY_AUTO, VIDEO_QUALITY_FLOOR,
};
use errors::ResolveError;
use models::{DashInfo, DashMedia, PlayUrlResponse, ViewData, ViewResponse};

// 从用户输入的 URL 中识别出的视频标识
#[derive(Debug, Clone, PartialEq)]
pub enum VideoUrlRef {
    Bvid(String),
    Aid(i64),
}

// 识别视频链接，支持 BV 号与 av 号两种形式
pub fn parse_url(url: &str) -> Result<VideoUrlRef, ResolveError> {
    let bv_re = Regex::new(r"BV\w+").expect("静态正则");
    if let Some(m) = bv_re.find(url) {
        return Ok(VideoUrlRef::Bvid(m.as_str().to_string()));
    }

    let av_re = Regex::new(r"av(\d+)").expect("静态正则");
    if let Some(caps) = av_re.captures(url) {
        let aid = caps[1].parse::<i64>().map_err(|_| ResolveError::InvalidUrl)?;
        return Ok(VideoUrlRef::Aid(aid));
    }

    Err(ResolveError::InvalidUrl)
}

// 媒体解析器：协商清晰度/编码，产出分块下载计划
pub struct MediaResolver {
    client: DownloadClient,
}

impl MediaResolver {
    pub fn new(client: DownloadClient) -> Self {
        Self { client }
    }

    // 获取视频基本信息，把 URL 换成内容标识
    pub async fn resolve_view(&self, url_ref: &VideoUrlRef) -> Result<ViewData, ResolveError> {
        let api = match url_ref {
            VideoUrlRef::Bvid(bvid) => {
                format!("https://api.bilibili.com/x/web-interface/view?bvid={}", bvid)
            }
            VideoUrlRef::Aid(aid) => {
                format!("https://api.bilibili.com/x/web-interface/view?aid={}", aid)
            }
        };

        let resp: ViewResponse = self.client.get_json(&api).await?;
        if resp.code != 0 {
            return Err(ResolveError::ApiError(format!(
                "code={} message={}",
                resp.code, resp.message
            )));
        }

        resp.data
            .ok_or_else(|| ResolveError::ApiError("响应缺少 data 字段".to_string()))
    }

    // 请求 playurl 接口并为任务构建下载计划。
    // 解析失败不会触碰文件系统，调用方负责把任务置为下载失败
    pub async fn resolve(&self, task: &mut DownloadTask) -> Result<ChunkPlan, ResolveError> {
        let api = Self::playurl_api(&task.content);
        debug!("请求 playurl: {}", api);

        let resp: PlayUrlResponse = self.client.get_json(&api).await?;
        if resp.code != 0 {
            return Err(ResolveError::ApiError(format!(
                "code={} message={}",
                resp.code, resp.message
            )));
        }

        let dash = resp
            .into_data()
            .and_then(|data| data.dash)
            .ok_or(ResolveError::MissingDash)?;

        build_plan(task, &dash)
    }

    fn playurl_api(content: &ContentRef) -> String {
        if content.is_bangumi() {
            format!(
                "https://api.bilibili.com/pgc/player/web/playurl?bvid={}&cid={}&qn=0&fnver=0&fnval=12240&fourk=1",
                content.bvid, content.cid
            )
        } else {
            format!(
                "https://api.bilibili.com/x/player/playurl?bvid={}&cid={}&qn=0&fnver=0&fnval=4048&fourk=1",
                content.bvid, content.cid
            )
        }
    }
}

// 根据 dash 流描述确定生效的清晰度/编码并组装下载计划。
// 会把协商结果（清晰度、编码、音质、容器、合成方式）写回任务
pub fn build_plan(task: &mut DownloadTask, dash: &DashInfo) -> Result<ChunkPlan, ResolveError> {
    let mut chunks = Vec::new();

    // 没有独立音轨的视频只能下载视频流
    if dash.audio.is_empty() && task.merge_type == MergeType::All {
        debug!("任务 {} 无独立音轨，降级为仅下载视频", task.id);
        task.merge_type = MergeType::VideoOnly;
    }

    if matches!(task.merge_type, MergeType::All | MergeType::VideoOnly) {
        let video = select_video(task, &dash.video)?;
        chunks.push(ChunkSpec {
            kind: StreamKind::Video,
            mirrors: video,
            file_name: task.video_temp_name(),
        });
    }

    if matches!(task.merge_type, MergeType::All | MergeType::AudioOnly) {
        let audio = select_audio(task, dash)?;
        chunks.push(ChunkSpec {
            kind: StreamKind::Audio,
            mirrors: audio,
            file_name: task.audio_temp_name(),
        });
    }

    if chunks.is_empty() {
        return Err(ResolveError::EmptyMirrorList);
    }

    Ok(ChunkPlan { chunks })
}

// 视频选择：清晰度自动/上限裁剪，编码不可用时退回 H.264
fn select_video(task: &mut DownloadTask, streams: &[DashMedia]) -> Result<Vec<String>, ResolveError> {
    let highest = highest_quality(streams, VIDEO_QUALITY_FLOOR);

    task.video_quality_id = if task.video_quality_id == VIDEO_QUALITY_AUTO {
        // 自动时选取最高可用清晰度
        highest
    } else if highest < task.video_quality_id {
        // 所选清晰度不存在时裁剪到最高可用
        highest
    } else {
        task.video_quality_id
    };

    let candidates: Vec<&DashMedia> = streams
        .iter()
        .filter(|s| s.id == task.video_quality_id)
        .collect();

    if candidates.is_empty() {
        return Err(ResolveError::NoVideoCandidate(task.video_quality_id));
    }

    // 优先使用配置的编码；不支持时取服务端顺序的第一个并回落 H.264
    let chosen = match candidates.iter().find(|s| s.codecid == task.video_codec_id) {
        Some(stream) => stream,
        None => {
            task.video_codec_id = VIDEO_CODEC_AVC;
            candidates[0]
        }
    };

    let mirrors = chosen.mirror_urls();
    if mirrors.is_empty() {
        return Err(ResolveError::EmptyMirrorList);
    }

    Ok(mirrors)
}

// 音频选择：默认音质与视频规则一致，最高档时尝试无损/杜比，
// 高级音轨提取出错则静默回到默认选择
fn select_audio(task: &mut DownloadTask, dash: &DashInfo) -> Result<Vec<String>, ResolveError> {
    let requested = task.audio_quality_id;

    let mut mirrors = select_default_audio(task, &dash.audio)?;

    if requested == AUDIO_QUALITY_HIGHEST {
        match select_premium_audio(dash) {
            Ok(Some((premium_mirrors, quality, container))) => {
                task.audio_quality_id = quality;
                task.audio_container = container;
                mirrors = premium_mirrors;
            }
            Ok(None) => {}
            Err(e) => {
                // 无法提取无损或杜比链接，维持默认音质
                debug!("任务 {} 高级音轨提取失败，回落默认音质: {}", task.id, e);
            }
        }
    }

    Ok(mirrors)
}

fn select_default_audio(
    task: &mut DownloadTask,
    streams: &[DashMedia],
) -> Result<Vec<String>, ResolveError> {
    if streams.is_empty() {
        return Err(ResolveError::NoAudioCandidate);
    }

    let highest = highest_quality(streams, AUDIO_QUALITY_FLOOR);

    let chosen = if highest < task.audio_quality_id || task.audio_quality_id == AUDIO_QUALITY_HIGHEST
    {
        highest
    } else {
        task.audio_quality_id
    };

    let candidate = streams
        .iter()
        .find(|s| s.id == chosen)
        .ok_or(ResolveError::NoAudioCandidate)?;

    let mirrors = candidate.mirror_urls();
    if mirrors.is_empty() {
        return Err(ResolveError::EmptyMirrorList);
    }

    task.audio_quality_id = chosen;
    task.audio_container = AudioContainer::Mp3;

    Ok(mirrors)
}

// 无损与杜比音轨；杜比在后，两者同时存在时以杜比为准
fn select_premium_audio(
    dash: &DashInfo,
) -> Result<Option<(Vec<String>, i32, AudioContainer)>, ResolveError> {
    let mut selected = None;

    if let Some(flac) = &dash.flac {
        if let Some(audio) = &flac.audio {
            let mirrors = audio.mirror_urls();
            if mirrors.is_empty() {
                return Err(ResolveError::EmptyMirrorList);
            }
            selected = Some((mirrors, AUDIO_QUALITY_HIRES, AudioContainer::Flac));
        }
    }

    if let Some(dolby) = &dash.dolby {
        if let Some(audio_list) = &dolby.audio {
            if let Some(audio) = audio_list.first() {
                let mirrors = audio.mirror_urls();
                if mirrors.is_empty() {
                    return Err(ResolveError::EmptyMirrorList);
                }
                selected = Some((mirrors, AUDIO_QUALITY_DOLBY, AudioContainer::Ec3));
            }
        }
    }

    Ok(selected)
}

fn highest_quality(streams: &[DashMedia], floor: i32) -> i32 {
    let mut highest = floor;
    for stream in streams {
        if stream.id > highest {
            highest = stream.id;
        }
    }
    highest
}
