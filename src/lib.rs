pub mod common;
pub mod downloader;
pub mod post_process;
pub mod resolver;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
