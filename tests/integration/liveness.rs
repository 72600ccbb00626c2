//! Heartbeat and timeout-progress behaviour of real processes.

use std::time::Duration;

use tempfile::TempDir;
use testgen::{Batch, ErrorKind, EventEmitter, OrchestratorEvent, TaskOrchestrator};
use tokio_test::assert_ok;

use crate::common::{drain, fast_config, python_tasks, tool_script};

#[tokio::test]
async fn test_silent_process_is_declared_dead_once() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let marker = temp_dir.path().join("signals");
    let tool = tool_script(
        temp_dir.path(),
        "tool",
        &format!(
            "trap 'echo TERM >> \"{}\"; exit 143' TERM\nsleep 30 &\nwait",
            marker.display()
        ),
    );
    let config = fast_config(tool)
        .with_retry_attempts(1)
        .with_liveness(Duration::from_millis(100), Duration::from_millis(400));
    let (events, mut receiver) = EventEmitter::channel();
    let orchestrator = TaskOrchestrator::with_events(config, events);

    let results = assert_ok!(
        orchestrator
            .process_batch(Batch::new(python_tasks(temp_dir.path(), 1), 1))
            .await
    );

    assert_eq!(results[0].error_kind, Some(ErrorKind::Timeout));
    let events = drain(&mut receiver);
    let dead = events
        .iter()
        .filter(|e| matches!(e.event, OrchestratorEvent::ProcessDead { .. }))
        .count();
    let slow = events
        .iter()
        .filter(|e| matches!(e.event, OrchestratorEvent::ProcessSlow { .. }))
        .count();
    assert_eq!(dead, 1);
    assert!(slow >= 1);
    let signals = std::fs::read_to_string(&marker).expect("tool never received a terminate signal");
    assert_eq!(signals.trim(), "TERM");
}

#[tokio::test]
async fn test_chatty_process_gets_progress_warnings_once_each() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tool = tool_script(
        temp_dir.path(),
        "tool",
        "while true; do echo working >&2; sleep 0.05; done",
    );
    let config = fast_config(tool)
        .with_retry_attempts(1)
        .with_timeout(Duration::from_millis(1000))
        .with_liveness(Duration::from_millis(100), Duration::from_secs(5));
    let (events, mut receiver) = EventEmitter::channel();
    let orchestrator = TaskOrchestrator::with_events(config, events);

    let results = assert_ok!(
        orchestrator
            .process_batch(Batch::new(python_tasks(temp_dir.path(), 1), 1))
            .await
    );

    assert_eq!(results[0].error_kind, Some(ErrorKind::Timeout));
    let percents: Vec<u8> = drain(&mut receiver)
        .into_iter()
        .filter_map(|e| match e.event {
            OrchestratorEvent::TimeoutWarning { percent, .. } => Some(percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![50, 75, 90, 100]);
}
