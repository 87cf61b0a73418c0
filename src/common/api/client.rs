use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, RANGE, REFERER, USER_AGENT};
use reqwest::{Client, ClientBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::error;

use super::error::ApiError;

// 下载客户端，统一携带 UA 与 Referer 请求头
#[derive(Debug, Clone)]
pub struct DownloadClient {
    pub inner: Client,
}

impl DownloadClient {
    pub fn new() -> Self {
        let headers = Self::get_default_headers();

        Self {
            inner: ClientBuilder::new()
                .connect_timeout(Duration::from_secs(10))
                .default_headers(headers)
                .build()
                .expect("构建 HTTP 客户端失败"),
        }
    }

    pub fn get_default_headers() -> reqwest::header::HeaderMap {
        // 创建默认请求头
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(ACCEPT, reqwest::header::HeaderValue::from_static("*/*"));
        headers.insert(
            ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("zh-CN,zh;q=0.9"),
        );
        headers.insert(
            REFERER,
            reqwest::header::HeaderValue::from_static("https://www.bilibili.com/"),
        );
        headers.insert(USER_AGENT, reqwest::header::HeaderValue::from_static("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36"));

        headers
    }

    // 通用 JSON 请求
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let resp = self.inner.get(url).send().await.map_err(|e| {
            error!("请求失败: {}", e);
            ApiError::InvalidResponse(format!("请求失败: {}", e))
        })?;

        if !resp.status().is_success() {
            return Err(ApiError::BadStatus(resp.status().as_u16()));
        }

        resp.json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    // 发起带 Range 与 Referer 的流式请求，用于断点续传
    pub async fn get_ranged(
        &self,
        url: &str,
        offset: u64,
        referer_url: &str,
    ) -> Result<Response, ApiError> {
        let resp = self
            .inner
            .get(url)
            .header(RANGE, format!("bytes={}-", offset))
            .header(REFERER, referer_url)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::BadStatus(status.as_u16()));
        }

        Ok(resp)
    }
}

impl Default for DownloadClient {
    fn default() -> Self {
        Self::new()
    }
}
