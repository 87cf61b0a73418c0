use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error, info};

use crate::downloader::models::{AudioContainer, DownloadTask, MergeType};

use super::{output_ext, output_stem};

// 合成失败时无法解码子进程输出的兜底文案
pub const DIAGNOSTIC_FALLBACK: &str = "无法获取错误信息";

// FFmpeg 合成（mux）时的中转文件名，成功后重命名为最终标题。
// 带任务 id，同一目录下并发合成的任务互不覆盖
fn mux_temp_name(task: &DownloadTask) -> String {
    format!("_out_{}.mp4", task.id)
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub ffmpeg_path: String,
    // 合成成功后是否保留音视频源文件
    pub keep_sources: bool,
    // 无损音频是否统一转换为标准 FLAC 容器
    pub standardize_lossless: bool,
    // 批量下载时是否在文件名前加序号
    pub numbering: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            keep_sources: false,
            standardize_lossless: false,
            numbering: true,
        }
    }
}

// 由任务推导出的合成计划，三种互斥形态
#[derive(Debug, Clone, PartialEq)]
pub enum MergePlan {
    // 音视频齐备：FFmpeg 流复制合成后改名
    Mux {
        video: PathBuf,
        audio: PathBuf,
        mux_temp: PathBuf,
        output: PathBuf,
    },
    // 仅存单个流：直接重命名
    Rename { from: PathBuf, to: PathBuf },
    // 无损音频 + 开启容器标准化：转封装而不是重命名
    Transcode { from: PathBuf, to: PathBuf },
}

// 合成诊断信息：保留子进程原始输出字节与退出码，
// 展示时才做有损解码，解码失败退回固定文案
#[derive(Debug, Clone, Default)]
pub struct MergeDiagnostics {
    pub raw_output: Vec<u8>,
    pub exit_code: Option<i32>,
}

impl MergeDiagnostics {
    pub fn log_text(&self) -> String {
        if self.raw_output.is_empty() {
            return DIAGNOSTIC_FALLBACK.to_string();
        }
        String::from_utf8_lossy(&self.raw_output).into_owned()
    }
}

#[derive(Debug)]
pub struct MergeFailure {
    pub diagnostics: MergeDiagnostics,
}

// 按合成方式推导计划。临时文件位于 work_dir，输出也写到 work_dir
pub fn plan_merge(task: &DownloadTask, work_dir: &Path, opts: &MergeOptions) -> MergePlan {
    let stem = output_stem(task, opts.numbering);
    let output = work_dir.join(format!("{}.{}", stem, output_ext(task)));

    match task.merge_type {
        MergeType::All => MergePlan::Mux {
            video: work_dir.join(task.video_temp_name()),
            audio: work_dir.join(task.audio_temp_name()),
            mux_temp: work_dir.join(mux_temp_name(task)),
            output,
        },
        MergeType::VideoOnly => MergePlan::Rename {
            from: work_dir.join(task.video_temp_name()),
            to: output,
        },
        MergeType::AudioOnly => {
            let from = work_dir.join(task.audio_temp_name());

            if task.audio_container == AudioContainer::Flac && opts.standardize_lossless {
                MergePlan::Transcode { from, to: output }
            } else {
                MergePlan::Rename { from, to: output }
            }
        }
    }
}

// 计划对应的外部命令。Rename 是纯文件系统操作，没有命令
pub fn build_command(plan: &MergePlan, opts: &MergeOptions) -> Option<(String, Vec<String>)> {
    match plan {
        MergePlan::Mux {
            video,
            audio,
            mux_temp,
            ..
        } => Some((
            opts.ffmpeg_path.clone(),
            vec![
                "-y".to_string(),
                "-i".to_string(),
                video.to_string_lossy().to_string(),
                "-i".to_string(),
                audio.to_string_lossy().to_string(),
                "-acodec".to_string(),
                "copy".to_string(),
                "-vcodec".to_string(),
                "copy".to_string(),
                "-strict".to_string(),
                "experimental".to_string(),
                mux_temp.to_string_lossy().to_string(),
            ],
        )),
        MergePlan::Transcode { from, to } => Some((
            opts.ffmpeg_path.clone(),
            vec![
                "-y".to_string(),
                "-i".to_string(),
                from.to_string_lossy().to_string(),
                "-c:a".to_string(),
                "flac".to_string(),
                to.to_string_lossy().to_string(),
            ],
        )),
        MergePlan::Rename { .. } => None,
    }
}

pub struct MergeStage;

impl MergeStage {
    // 执行合成。成功返回产物路径；失败保留源文件并带回诊断信息，
    // 用户重试时会重新推导出完全相同的命令
    pub async fn run(
        task: &DownloadTask,
        work_dir: &Path,
        opts: &MergeOptions,
    ) -> Result<Vec<PathBuf>, MergeFailure> {
        let plan = plan_merge(task, work_dir, opts);
        debug!("任务 {} 合成计划: {:?}", task.id, plan);

        match &plan {
            MergePlan::Rename { from, to } => match tokio::fs::rename(from, to).await {
                Ok(_) => {
                    info!("任务 {} 重命名完成: {:?}", task.id, to);
                    Ok(vec![to.clone()])
                }
                Err(e) => Err(MergeFailure {
                    diagnostics: MergeDiagnostics {
                        raw_output: format!("重命名失败: {}", e).into_bytes(),
                        exit_code: None,
                    },
                }),
            },

            MergePlan::Transcode { from, to } => {
                Self::run_command(&plan, opts).await?;

                if !opts.keep_sources {
                    let _ = tokio::fs::remove_file(from).await;
                }

                info!("任务 {} 转封装完成: {:?}", task.id, to);
                Ok(vec![to.clone()])
            }

            MergePlan::Mux {
                video,
                audio,
                mux_temp,
                output,
            } => {
                Self::run_command(&plan, opts).await?;

                // 成功之后才移动中转文件，失败时源文件原样保留
                if let Err(e) = tokio::fs::rename(mux_temp, output).await {
                    return Err(MergeFailure {
                        diagnostics: MergeDiagnostics {
                            raw_output: format!("移动输出文件失败: {}", e).into_bytes(),
                            exit_code: None,
                        },
                    });
                }

                let mut outputs = vec![output.clone()];

                if opts.keep_sources {
                    // 保留源文件时改成可读的名字
                    let stem = output_stem(task, opts.numbering);
                    let kept_video = work_dir.join(format!("{}_video.mp4", stem));
                    let kept_audio = work_dir.join(format!(
                        "{}_audio.{}",
                        stem,
                        task.audio_container.ext()
                    ));

                    let _ = tokio::fs::rename(video, &kept_video).await;
                    let _ = tokio::fs::rename(audio, &kept_audio).await;
                    outputs.push(kept_video);
                    outputs.push(kept_audio);
                } else {
                    let _ = tokio::fs::remove_file(video).await;
                    let _ = tokio::fs::remove_file(audio).await;
                }

                info!("任务 {} 合成完成: {:?}", task.id, output);
                Ok(outputs)
            }
        }
    }

    // 以受控子进程执行外部命令，合并捕获 stdout/stderr
    async fn run_command(plan: &MergePlan, opts: &MergeOptions) -> Result<(), MergeFailure> {
        let Some((program, args)) = build_command(plan, opts) else {
            return Ok(());
        };

        let output = match Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                // 进程启动失败
                error!("启动 {} 失败: {}", program, e);
                return Err(MergeFailure {
                    diagnostics: MergeDiagnostics {
                        raw_output: format!("尝试启动子进程时出错: {}", e).into_bytes(),
                        exit_code: None,
                    },
                });
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        Err(MergeFailure {
            diagnostics: MergeDiagnostics {
                raw_output: combined,
                exit_code: output.status.code(),
            },
        })
    }
}
