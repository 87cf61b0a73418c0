use serde_json::json;
use tempfile::TempDir;

use bili_download_manager::downloader::models::{ContentRef, DownloadTask, TaskStatus};
use bili_download_manager::downloader::store::PersistenceStore;

fn make_task(title: &str) -> DownloadTask {
    DownloadTask::new(
        title.to_string(),
        ContentRef {
            bvid: "BV1xx411c7XD".to_string(),
            aid: 100,
            cid: 200,
            ep_id: None,
        },
        "https://www.bilibili.com/video/BV1xx411c7XD".to_string(),
    )
}

#[tokio::test]
async fn test_save_and_load_round_trip() {
    let tmp = TempDir::new().unwrap();
    let store = PersistenceStore::new(tmp.path()).await.unwrap();

    let mut task = make_task("往返测试");
    task.total_size = 1234;
    task.completed_size = 567;
    store.save(&task).await.unwrap();

    let loaded = store.load_all().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, task.id);
    assert_eq!(loaded[0].title, "往返测试");
    assert_eq!(loaded[0].total_size, 1234);
    assert_eq!(loaded[0].completed_size, 567);
}

#[tokio::test]
async fn test_load_demotes_downloading_to_paused() {
    let tmp = TempDir::new().unwrap();
    let store = PersistenceStore::new(tmp.path()).await.unwrap();

    let mut task = make_task("中断的下载");
    task.status = TaskStatus::Downloading;
    store.save(&task).await.unwrap();

    let loaded = store.load_all().await.unwrap();
    assert_eq!(loaded[0].status, TaskStatus::Paused);
}

#[tokio::test]
async fn test_update_fields_preserves_other_fields() {
    let tmp = TempDir::new().unwrap();
    let store = PersistenceStore::new(tmp.path()).await.unwrap();

    let mut task = make_task("增量更新");
    task.total_size = 1000;
    store.save(&task).await.unwrap();

    // 进度心跳只更新两个字段
    store
        .update_fields(task.id, json!({ "completed_size": 250, "progress": 25 }))
        .await
        .unwrap();

    let loaded = store.load_all().await.unwrap();
    assert_eq!(loaded[0].title, "增量更新");
    assert_eq!(loaded[0].total_size, 1000);
    assert_eq!(loaded[0].completed_size, 250);
    assert_eq!(loaded[0].progress, 25);
    assert_eq!(loaded[0].content.bvid, "BV1xx411c7XD");
}

#[tokio::test]
async fn test_corrupt_record_skipped_without_failing() {
    let tmp = TempDir::new().unwrap();
    let store = PersistenceStore::new(tmp.path()).await.unwrap();

    let task = make_task("完好记录");
    store.save(&task).await.unwrap();

    tokio::fs::write(tmp.path().join("999.json"), b"{ not valid json")
        .await
        .unwrap();
    tokio::fs::write(tmp.path().join("notes.txt"), b"ignored")
        .await
        .unwrap();

    let loaded = store.load_all().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, task.id);
}

#[tokio::test]
async fn test_record_with_unknown_fields_still_loads() {
    let tmp = TempDir::new().unwrap();
    let store = PersistenceStore::new(tmp.path()).await.unwrap();

    let task = make_task("兼容旧版");
    store.save(&task).await.unwrap();
    // 模拟旧版本程序写入的额外字段
    store
        .update_fields(task.id, json!({ "legacy_field": "whatever" }))
        .await
        .unwrap();

    let loaded = store.load_all().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].title, "兼容旧版");
}

#[tokio::test]
async fn test_writes_leave_no_partial_record_behind() {
    let tmp = TempDir::new().unwrap();
    let store = PersistenceStore::new(tmp.path()).await.unwrap();

    // 上次进程写一半崩溃留下的残缺临时文件
    let task = make_task("崩溃恢复");
    tokio::fs::write(
        tmp.path().join(format!("{}.json.tmp", task.id)),
        b"{\"id\": 1, \"tit",
    )
    .await
    .unwrap();

    store.save(&task).await.unwrap();
    store
        .update_fields(task.id, json!({ "completed_size": 100 }))
        .await
        .unwrap();

    // 残缺文件不算记录，正式记录完好
    let loaded = store.load_all().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].title, "崩溃恢复");
    assert_eq!(loaded[0].completed_size, 100);

    // 写入走先写临时文件再改名的路径，收尾后目录里没有临时文件
    let mut entries = tokio::fs::read_dir(tmp.path()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name().to_string_lossy().to_string();
        assert!(name.ends_with(".json"), "遗留文件: {}", name);
    }
}

#[tokio::test]
async fn test_clear_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let store = PersistenceStore::new(tmp.path()).await.unwrap();

    let task = make_task("待清理");
    store.save(&task).await.unwrap();

    store.clear(task.id).await.unwrap();
    assert!(store.load_all().await.unwrap().is_empty());

    // 再次清理不报错
    store.clear(task.id).await.unwrap();
}
