use thiserror::Error;

use crate::common::api::error::ApiError;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("无效的URL")]
    InvalidUrl,

    #[error("API错误: {0}")]
    ApiError(String),

    #[error("响应缺少 dash 流信息")]
    MissingDash,

    #[error("清晰度 {0} 下没有可用的视频流")]
    NoVideoCandidate(i32),

    #[error("没有可用的音频流")]
    NoAudioCandidate,

    #[error("镜像地址列表为空")]
    EmptyMirrorList,
}

impl From<ApiError> for ResolveError {
    fn from(err: ApiError) -> Self {
        ResolveError::ApiError(err.to_string())
    }
}
