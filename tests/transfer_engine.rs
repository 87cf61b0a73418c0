use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bili_download_manager::downloader::engine::{
    TransferContext, TransferEngine, TransferOutcome,
};
use bili_download_manager::downloader::error::DownloadError;
use bili_download_manager::downloader::events::NoopEvents;
use bili_download_manager::downloader::models::{
    ChunkPlan, ChunkSpec, ContentRef, DownloadTask, StreamKind,
};
use bili_download_manager::downloader::store::PersistenceStore;
use bili_download_manager::common::api::client::DownloadClient;

fn make_task() -> DownloadTask {
    DownloadTask::new(
        "传输测试".to_string(),
        ContentRef::default(),
        "https://www.bilibili.com/video/BV1xx411c7XD".to_string(),
    )
}

async fn make_ctx(
    task: DownloadTask,
    plan: ChunkPlan,
    tmp_dir: &TempDir,
) -> (TransferContext, Arc<Mutex<DownloadTask>>) {
    let store = PersistenceStore::new(tmp_dir.path().join("records"))
        .await
        .unwrap();
    store.save(&task).await.unwrap();

    let task = Arc::new(Mutex::new(task));
    let ctx = TransferContext {
        task: Arc::clone(&task),
        plan,
        tmp_dir: tmp_dir.path().to_path_buf(),
        pause: CancellationToken::new(),
        stop: CancellationToken::new(),
        events: Arc::new(NoopEvents),
        store,
    };
    (ctx, task)
}

fn single_chunk_plan(task: &DownloadTask, mirrors: Vec<String>) -> ChunkPlan {
    ChunkPlan {
        chunks: vec![ChunkSpec {
            kind: StreamKind::Video,
            mirrors,
            file_name: task.video_temp_name(),
        }],
    }
}

#[tokio::test]
async fn test_full_transfer_writes_all_bytes() {
    let server = MockServer::start().await;
    let body = vec![0xABu8; 1000];

    Mock::given(method("GET"))
        .and(path("/video.m4s"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let task = make_task();
    let plan = single_chunk_plan(&task, vec![format!("{}/video.m4s", server.uri())]);
    let file_name = task.video_temp_name();
    let (ctx, handle) = make_ctx(task, plan, &tmp).await;

    let engine = TransferEngine::new(DownloadClient::new());
    let outcome = engine.download(&ctx).await.unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    let written = tokio::fs::read(tmp.path().join(&file_name)).await.unwrap();
    assert_eq!(written, body);

    let task = handle.lock().await;
    assert_eq!(task.total_size, 1000);
    assert_eq!(task.completed_size, 1000);
    assert!(task.download_finished());
}

#[tokio::test]
async fn test_resume_requests_range_from_existing_bytes() {
    let server = MockServer::start().await;
    let tail = vec![0xCDu8; 600];

    // 只应答从第 400 字节起的 Range 请求
    Mock::given(method("GET"))
        .and(path("/video.m4s"))
        .and(header("range", "bytes=400-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(tail.clone()))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let task = make_task();
    let file_name = task.video_temp_name();
    tokio::fs::write(tmp.path().join(&file_name), vec![0xABu8; 400])
        .await
        .unwrap();

    let plan = single_chunk_plan(&task, vec![format!("{}/video.m4s", server.uri())]);
    let (ctx, handle) = make_ctx(task, plan, &tmp).await;

    let engine = TransferEngine::new(DownloadClient::new());
    let outcome = engine.download(&ctx).await.unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    let written = tokio::fs::read(tmp.path().join(&file_name)).await.unwrap();
    assert_eq!(written.len(), 1000);
    assert_eq!(&written[..400], &[0xABu8; 400][..]);
    assert_eq!(&written[400..], &tail[..]);

    let task = handle.lock().await;
    assert_eq!(task.total_size, 1000);
    assert_eq!(task.completed_size, 1000);
}

#[tokio::test]
async fn test_resume_skips_mirror_that_ignores_range() {
    let server = MockServer::start().await;
    let full = vec![0xABu8; 1000];
    let tail = vec![0xCDu8; 600];

    // 第一个镜像无视 Range, 总是回 200 和整个文件
    Mock::given(method("GET"))
        .and(path("/full.m4s"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(full.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/partial.m4s"))
        .and(header("range", "bytes=400-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(tail.clone()))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let task = make_task();
    let file_name = task.video_temp_name();
    tokio::fs::write(tmp.path().join(&file_name), vec![0xABu8; 400])
        .await
        .unwrap();

    let plan = single_chunk_plan(
        &task,
        vec![
            format!("{}/full.m4s", server.uri()),
            format!("{}/partial.m4s", server.uri()),
        ],
    );
    let (ctx, handle) = make_ctx(task, plan, &tmp).await;

    let engine = TransferEngine::new(DownloadClient::new());
    let outcome = engine.download(&ctx).await.unwrap();

    // 完整文件不会被当作剩余部分追加进去
    assert_eq!(outcome, TransferOutcome::Completed);
    let written = tokio::fs::read(tmp.path().join(&file_name)).await.unwrap();
    assert_eq!(written.len(), 1000);
    assert_eq!(&written[400..], &tail[..]);

    let task = handle.lock().await;
    assert_eq!(task.total_size, 1000);
    assert_eq!(task.completed_size, 1000);
}

#[tokio::test]
async fn test_resume_with_only_rangeless_mirrors_fails() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/full.m4s"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1000]))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let task = make_task();
    let file_name = task.video_temp_name();
    tokio::fs::write(tmp.path().join(&file_name), vec![0u8; 400])
        .await
        .unwrap();

    let plan = single_chunk_plan(&task, vec![format!("{}/full.m4s", server.uri())]);
    let (ctx, _handle) = make_ctx(task, plan, &tmp).await;

    let engine = TransferEngine::new(DownloadClient::new());
    let err = engine.download(&ctx).await.unwrap_err();

    assert!(matches!(err, DownloadError::MirrorsExhausted(_)));
    // 已有字节保持原样，没有被污染
    let written = tokio::fs::read(tmp.path().join(&file_name)).await.unwrap();
    assert_eq!(written.len(), 400);
}

#[tokio::test]
async fn test_mirror_fallback_in_list_order() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/bad.m4s"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/good.m4s"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1u8; 200]))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let task = make_task();
    let file_name = task.video_temp_name();
    let plan = single_chunk_plan(
        &task,
        vec![
            format!("{}/bad.m4s", server.uri()),
            format!("{}/good.m4s", server.uri()),
        ],
    );
    let (ctx, _handle) = make_ctx(task, plan, &tmp).await;

    let engine = TransferEngine::new(DownloadClient::new());
    let outcome = engine.download(&ctx).await.unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    let written = tokio::fs::read(tmp.path().join(&file_name)).await.unwrap();
    assert_eq!(written.len(), 200);
}

#[tokio::test]
async fn test_already_complete_chunk_skipped_on_416() {
    let server = MockServer::start().await;

    // 文件已完整时的探测请求会落到文件末尾之外
    Mock::given(method("GET"))
        .and(path("/video.m4s"))
        .and(header("range", "bytes=1000-"))
        .respond_with(ResponseTemplate::new(416))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let task = make_task();
    let file_name = task.video_temp_name();
    tokio::fs::write(tmp.path().join(&file_name), vec![7u8; 1000])
        .await
        .unwrap();

    let plan = single_chunk_plan(&task, vec![format!("{}/video.m4s", server.uri())]);
    let (ctx, handle) = make_ctx(task, plan, &tmp).await;

    let engine = TransferEngine::new(DownloadClient::new());
    let outcome = engine.download(&ctx).await.unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    // 已有字节原样保留
    let written = tokio::fs::read(tmp.path().join(&file_name)).await.unwrap();
    assert_eq!(written, vec![7u8; 1000]);
    assert_eq!(handle.lock().await.completed_size, 1000);
}

#[tokio::test]
async fn test_pause_signal_stops_before_streaming() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/video.m4s"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![0u8; 500]))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let task = make_task();
    let plan = single_chunk_plan(&task, vec![format!("{}/video.m4s", server.uri())]);
    let (ctx, handle) = make_ctx(task, plan, &tmp).await;

    ctx.pause.cancel();
    let engine = TransferEngine::new(DownloadClient::new());
    let outcome = engine.download(&ctx).await.unwrap();

    assert_eq!(outcome, TransferOutcome::Paused);
    // 总大小已经探测出来，便于恢复时展示进度
    assert_eq!(handle.lock().await.total_size, 500);
}

#[tokio::test]
async fn test_stop_signal_aborts_transfer() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/video.m4s"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![0u8; 500]))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let task = make_task();
    let plan = single_chunk_plan(&task, vec![format!("{}/video.m4s", server.uri())]);
    let (ctx, _handle) = make_ctx(task, plan, &tmp).await;

    ctx.stop.cancel();
    let engine = TransferEngine::new(DownloadClient::new());
    let outcome = engine.download(&ctx).await.unwrap();

    assert_eq!(outcome, TransferOutcome::Stopped);
}

#[tokio::test]
async fn test_all_mirrors_failing_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let task = make_task();
    let plan = single_chunk_plan(
        &task,
        vec![
            format!("{}/a.m4s", server.uri()),
            format!("{}/b.m4s", server.uri()),
        ],
    );
    let (ctx, _handle) = make_ctx(task, plan, &tmp).await;

    let engine = TransferEngine::new(DownloadClient::new());
    let err = engine.download(&ctx).await.unwrap_err();

    assert!(matches!(err, DownloadError::MirrorsExhausted(_)));
}

#[tokio::test]
async fn test_two_stream_plan_downloads_both_files() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/video.m4s"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1u8; 600]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/audio.m4s"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![2u8; 400]))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let task = make_task();
    let video_name = task.video_temp_name();
    let audio_name = task.audio_temp_name();
    let plan = ChunkPlan {
        chunks: vec![
            ChunkSpec {
                kind: StreamKind::Video,
                mirrors: vec![format!("{}/video.m4s", server.uri())],
                file_name: video_name.clone(),
            },
            ChunkSpec {
                kind: StreamKind::Audio,
                mirrors: vec![format!("{}/audio.m4s", server.uri())],
                file_name: audio_name.clone(),
            },
        ],
    };
    let (ctx, handle) = make_ctx(task, plan, &tmp).await;

    let engine = TransferEngine::new(DownloadClient::new());
    let outcome = engine.download(&ctx).await.unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    assert_eq!(
        tokio::fs::read(tmp.path().join(&video_name))
            .await
            .unwrap()
            .len(),
        600
    );
    assert_eq!(
        tokio::fs::read(tmp.path().join(&audio_name))
            .await
            .unwrap()
            .len(),
        400
    );

    let task = handle.lock().await;
    assert_eq!(task.total_size, 1000);
    assert_eq!(task.completed_size, 1000);
}
