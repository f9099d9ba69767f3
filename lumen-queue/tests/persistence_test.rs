//! Snapshot round-trips through `TaskQueue::open`

use lumen_config::QueueConfig;
use lumen_core::{Priority, TaskKind, TaskRequest, TaskStatus};
use lumen_queue::{QueueSnapshot, SnapshotStore, TaskQueue};
use serde_json::json;
use std::path::Path;
use std::time::Duration;

fn config_at(path: &Path) -> QueueConfig {
    QueueConfig {
        persistence_path: Some(path.to_path_buf()),
        save_interval: Duration::from_secs(3600),
        ..QueueConfig::default()
    }
}

fn scan(path: &str) -> TaskRequest {
    TaskRequest::new(TaskKind::ScanDirectory, json!({ "path": path }))
}

#[tokio::test]
async fn test_restart_restores_same_ids_all_queued() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");

    let queue = TaskQueue::open(&config_at(&path)).await.unwrap();
    let a = queue.enqueue(scan("/a"), Priority::Critical).unwrap();
    let b = queue.enqueue(scan("/b"), Priority::Normal).unwrap();
    let c = queue.enqueue(scan("/c"), Priority::Normal).unwrap();
    let running = queue.dequeue().unwrap();
    assert_eq!(running.id, a);
    queue.shutdown().await;
    assert!(queue.is_empty());

    let restored = TaskQueue::open(&config_at(&path)).await.unwrap();
    assert_eq!(restored.queued_ids(), vec![a, b, c]);
    for id in [a, b, c] {
        let task = restored.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.dequeued_at.is_none());
    }
    assert_eq!(restored.get(b).unwrap().payload, json!({"path": "/b"}));
}

#[tokio::test]
async fn test_retry_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");

    let queue = TaskQueue::open(&config_at(&path)).await.unwrap();
    let id = queue.enqueue(scan("/flaky"), Priority::High).unwrap();
    queue.dequeue().unwrap();
    queue.fail(id, "disk unplugged").unwrap();
    queue.shutdown().await;

    let restored = TaskQueue::open(&config_at(&path)).await.unwrap();
    let task = restored.get(id).unwrap();
    assert_eq!(task.attempts, 1);
    assert_eq!(task.priority, Priority::Normal);
    assert_eq!(task.last_error.as_deref(), Some("disk unplugged"));
    assert_eq!(restored.stats().normal, 1);
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    std::fs::write(&path, "{\"version\": 1, \"critical\": [oops").unwrap();

    let queue = TaskQueue::open(&config_at(&path)).await.unwrap();
    assert!(queue.is_empty());

    // Still usable, and the next save replaces the corrupt file
    queue.enqueue(scan("/fresh"), Priority::Low).unwrap();
    queue.save().await.unwrap();
    let snapshot = SnapshotStore::new(&path).load().await.unwrap().unwrap();
    assert_eq!(snapshot.low.len(), 1);
}

#[tokio::test]
async fn test_periodic_save_writes_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("periodic").join("queue.json");
    let config = QueueConfig {
        save_interval: Duration::from_millis(50),
        ..config_at(&path)
    };

    let queue = TaskQueue::open(&config).await.unwrap();
    let id = queue.enqueue(scan("/periodic"), Priority::High).unwrap();

    let mut snapshot: Option<QueueSnapshot> = None;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Ok(Some(found)) = SnapshotStore::new(&path).load().await {
            if !found.high.is_empty() {
                snapshot = Some(found);
                break;
            }
        }
    }

    let snapshot = snapshot.expect("periodic snapshot was never written");
    assert_eq!(snapshot.high[0].id, id);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_in_memory_queue_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    let config = QueueConfig {
        persistence_enabled: false,
        ..config_at(&path)
    };

    let queue = TaskQueue::open(&config).await.unwrap();
    queue.enqueue(scan("/tmp"), Priority::Normal).unwrap();
    queue.shutdown().await;

    assert!(!path.exists());
}
