use std::path::PathBuf;

use thiserror::Error;

use crate::common::api::error::ApiError;
use crate::resolver::errors::ResolveError;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP错误: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("解析失败: {0}")]
    Resolve(#[from] ResolveError),

    #[error("任务未找到: {0}")]
    TaskNotFound(i64),

    #[error("任务已存在: {0}")]
    TaskAlreadyExists(i64),

    #[error("无效的状态: {0}")]
    InvalidState(String),

    #[error("文件不存在: {0:?}")]
    FileNotFound(PathBuf),

    #[error("所有镜像地址均下载失败: {0}")]
    MirrorsExhausted(String),

    #[error("合成失败: {0}")]
    MergeError(String),

    #[error("未检测到 FFmpeg，请安装或通过 --ffmpeg-path 指定路径")]
    FfmpegNotFound,
}

impl From<ApiError> for DownloadError {
    fn from(e: ApiError) -> Self {
        DownloadError::InvalidState(e.to_string())
    }
}
