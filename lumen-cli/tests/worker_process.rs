//! Drives the real `lumen worker` binary through a process-backed pool

use lumen_config::PoolConfig;
use lumen_core::{MetadataRequest, ScanRequest};
use lumen_execution::{MetadataManager, ProcessLauncher, ScanManager, WorkerPool, WorkerState};
use std::fs;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

const LUMEN: &str = env!("CARGO_BIN_EXE_lumen");

fn process_pool(name: &str, max_workers: usize) -> WorkerPool {
    let launcher = ProcessLauncher::new(LUMEN, vec!["worker".to_string()]);
    let config = PoolConfig {
        min_workers: 1,
        max_workers,
        task_timeout: Duration::from_secs(30),
        ..PoolConfig::default()
    };
    WorkerPool::new(name, config, Arc::new(launcher)).unwrap()
}

#[tokio::test]
async fn test_scan_through_worker_process() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("movie.mkv"), vec![0u8; 64]).unwrap();
    fs::write(dir.path().join("cover.txt"), b"cover").unwrap();

    let pool = process_pool("scan", 1);
    pool.initialize().await.unwrap();

    let workers = pool.worker_stats();
    assert_eq!(workers.len(), 1);
    assert!(workers[0].pid.is_some());

    let summary = ScanManager::new(pool.clone())
        .scan_directory(ScanRequest::new(dir.path()).with_extensions(["mkv"]))
        .await
        .unwrap();
    assert_eq!(summary.files.len(), 1);
    assert_eq!(summary.total_bytes(), 64);
    assert_eq!(summary.skipped, 1);

    let workers = pool.worker_stats();
    assert_eq!(workers[0].tasks_executed, 1);
    assert_eq!(workers[0].state, WorkerState::Available);

    pool.shutdown(Duration::from_secs(5)).await;
    assert_eq!(pool.status().total, 0);
}

#[tokio::test]
async fn test_task_failure_keeps_worker_process() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("clip.mp4");
    fs::write(&file, b"not really a video").unwrap();

    let pool = process_pool("metadata", 2);
    pool.initialize().await.unwrap();
    let manager = MetadataManager::new(pool.clone());

    let err = manager
        .extract(MetadataRequest::new(dir.path().join("missing.mp4")))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let metadata = manager.extract(MetadataRequest::new(&file)).await.unwrap();
    assert_eq!(metadata.size_bytes, 18);
    assert_eq!(metadata.extension.as_deref(), Some("mp4"));

    let workers = pool.worker_stats();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].restart_count, 0);
    assert_eq!(workers[0].tasks_executed, 2);

    assert_eq!(pool.ping_all(Duration::from_secs(5)).await.len(), 1);
    pool.shutdown(Duration::from_secs(5)).await;
}

#[test]
fn test_config_sample_command() {
    let output = Command::new(LUMEN)
        .args(["config", "sample"])
        .env("RUST_LOG", "error")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pools:"));
    assert!(stdout.contains("max_attempts"));
}

#[test]
fn test_submit_then_inspect_backlog() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("queue.json");
    let config = dir.path().join("lumen.yaml");
    fs::write(
        &config,
        format!(
            "queue:\n  persistence_path: {}\nlogging:\n  level: error\n",
            snapshot.display()
        ),
    )
    .unwrap();

    let lumen = |args: &[&str]| {
        Command::new(LUMEN)
            .args(args)
            .arg("--config")
            .arg(&config)
            .output()
            .unwrap()
    };

    let submitted = lumen(&[
        "queue",
        "submit",
        "--domain",
        "metadata",
        "--payload",
        r#"{"path": "/media/a.mp4"}"#,
        "--priority",
        "high",
    ]);
    assert!(submitted.status.success(), "{:?}", submitted);
    assert!(snapshot.exists());

    let stats = lumen(&["queue", "stats"]);
    assert!(stats.status.success());
    let stdout = String::from_utf8_lossy(&stats.stdout);
    assert!(stdout.contains("high      1"), "{}", stdout);
    assert!(stdout.contains("total     1"), "{}", stdout);

    let rejected = lumen(&[
        "queue", "submit", "--domain", "audio", "--payload", "{}",
    ]);
    assert!(!rejected.status.success());
}
