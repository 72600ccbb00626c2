//! Cancelling a running batch.

use std::time::{Duration, Instant};

use tempfile::TempDir;
use testgen::{Batch, ErrorKind, TaskOrchestrator, TaskStatus};
use tokio_test::assert_ok;

use crate::common::{fast_config, python_tasks, tool_script};

#[tokio::test]
async fn test_cancel_all_stops_running_and_queued_tasks() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tool = tool_script(
        temp_dir.path(),
        "tool",
        "while true; do echo working >&2; sleep 0.1; done",
    );
    let orchestrator = TaskOrchestrator::new(fast_config(tool));

    let started = Instant::now();
    let run = orchestrator.process_batch(Batch::new(python_tasks(temp_dir.path(), 5), 2));
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(orchestrator.active_processes().len(), 2);
        orchestrator.cancel_all().await;
        assert!(orchestrator.active_processes().is_empty());
    };
    let (results, ()) = tokio::join!(run, cancel);
    let results = assert_ok!(results);

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(results.len(), 5);
    assert!(results
        .iter()
        .all(|r| r.error_kind == Some(ErrorKind::Cancelled)));
    for result in &results {
        assert_eq!(orchestrator.task_status(&result.task_id), Some(TaskStatus::Failed));
    }
    assert_eq!(orchestrator.stats().failed_tasks, 5);
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_orchestrator_is_reusable_after_cancel() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tool = tool_script(temp_dir.path(), "tool", "printf '%s\\n' '{\"result\":\"ok\"}'");
    let orchestrator = TaskOrchestrator::new(fast_config(tool));

    orchestrator.cancel_all().await;
    let results = assert_ok!(
        orchestrator
            .process_batch(Batch::new(python_tasks(temp_dir.path(), 2), 2))
            .await
    );
    assert!(results.iter().all(|r| r.success));
}
