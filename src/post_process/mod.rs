pub mod merger;

use std::path::Path;

use crate::downloader::models::{DownloadTask, MergeType};

// 去掉文件名中的非法字符
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect::<String>()
        .trim()
        .to_string()
}

// 最终输出文件名（不含扩展名）。批量下载且开启编号时带上序号前缀
pub fn output_stem(task: &DownloadTask, numbering: bool) -> String {
    let title = sanitize_title(&task.title);

    if task.index > 0 && numbering {
        format!("{} - {}", task.index, title)
    } else {
        title
    }
}

pub fn output_ext(task: &DownloadTask) -> &'static str {
    match task.merge_type {
        MergeType::All | MergeType::VideoOnly => "mp4",
        MergeType::AudioOnly => task.audio_container.ext(),
    }
}

// 打开文件所在目录并尽量选中文件，平台命令各不相同。
// Linux 的 xdg-open 不支持选中文件，退而打开所在目录
pub fn reveal_command(path: &Path) -> (String, Vec<String>) {
    let dir = path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string());

    match std::env::consts::OS {
        "windows" => (
            "explorer".to_string(),
            vec![format!("/select,{}", path.to_string_lossy())],
        ),
        "macos" => (
            "open".to_string(),
            vec!["-R".to_string(), path.to_string_lossy().to_string()],
        ),
        _ => ("xdg-open".to_string(), vec![dir]),
    }
}

pub async fn reveal_in_folder(path: &Path) -> std::io::Result<()> {
    let (program, args) = reveal_command(path);
    tokio::process::Command::new(program)
        .args(args)
        .spawn()
        .map(|_| ())
}
