//! End-to-end batch runs against scripted tools.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use testgen::process::PLACEHOLDER_MARKER;
use testgen::{Batch, ErrorKind, EventEmitter, OrchestratorEvent, Task, TaskOrchestrator, TaskStatus};
use tokio_test::assert_ok;

use crate::common::{drain, fast_config, json_reply, python_tasks, tool_script};

#[tokio::test]
async fn test_five_tasks_two_workers_all_complete() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tool = tool_script(
        temp_dir.path(),
        "tool",
        &format!("sleep 0.2\n{}", json_reply("def test_generated():\n    assert True")),
    );
    let orchestrator = TaskOrchestrator::new(fast_config(tool));
    let batch = Batch::new(python_tasks(temp_dir.path(), 5), 2);

    // Sample the process registry while the batch runs
    let done = AtomicBool::new(false);
    let run = async {
        let results = orchestrator.process_batch(batch).await;
        done.store(true, Ordering::SeqCst);
        results
    };
    let sample = async {
        let mut peak = 0;
        while !done.load(Ordering::SeqCst) {
            peak = peak.max(orchestrator.active_processes().len());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        peak
    };
    let (results, peak) = tokio::join!(run, sample);
    let results = assert_ok!(results);

    assert!(peak <= 2, "saw {} concurrent processes", peak);
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.success && r.attempts == 1));

    let stats = orchestrator.stats();
    assert_eq!(stats.completed_tasks, 5);
    assert_eq!(stats.failed_tasks, 0);
    assert_eq!(stats.tokens_used, 5 * 42);
    assert!((stats.total_cost - 0.01).abs() < 1e-9);

    let written = std::fs::read_to_string(temp_dir.path().join("tests/test_module_3.py"))
        .expect("Failed to read generated test");
    assert_eq!(written, "def test_generated():\n    assert True");
    assert_eq!(orchestrator.task_status("task-3"), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn test_auth_failure_terminates_without_retry() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let marker = temp_dir.path().join("terminated");
    let tool = tool_script(
        temp_dir.path(),
        "tool",
        &format!(
            "trap 'echo TERM > \"{}\"; exit 143' TERM\necho 'Authentication failed' >&2\nsleep 30 &\nwait",
            marker.display()
        ),
    );
    let orchestrator = TaskOrchestrator::new(fast_config(tool));

    let started = Instant::now();
    let results = assert_ok!(
        orchestrator
            .process_batch(Batch::new(python_tasks(temp_dir.path(), 1), 1))
            .await
    );

    let result = &results[0];
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Authentication));
    assert_eq!(result.attempts, 1);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(marker.exists(), "tool never received a terminate signal");
    assert!(orchestrator.active_processes().is_empty());
    assert!(orchestrator
        .generate_report()
        .contains("task-0 [authentication]"));
}

#[tokio::test]
async fn test_unavailable_tool_degrades_to_placeholders() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tool = tool_script(
        temp_dir.path(),
        "tool",
        "echo 'Error: Invalid API key' >&2\nexit 1",
    );
    let scenarios = vec![
        "returns the sum of two numbers".to_string(),
        "raises ValueError on empty input".to_string(),
    ];
    let task = Task::new(
        "calc",
        "src/calc.py",
        temp_dir.path().join("tests/test_calc.py"),
        "Write tests for calc",
    )
    .with_language("python")
    .with_missing_scenarios(scenarios.clone());

    let (events, mut receiver) = EventEmitter::channel();
    let orchestrator =
        TaskOrchestrator::with_events(fast_config(tool).with_graceful_degradation(true), events);
    let results = assert_ok!(orchestrator.process_batch(Batch::new(vec![task], 1)).await);

    let result = &results[0];
    assert!(result.success);
    assert!(result.degraded);
    assert_eq!(result.tokens_used, 0);
    assert_eq!(result.actual_cost, 0.0);
    let output = result.output.as_deref().expect("placeholder output");
    assert!(output.contains(PLACEHOLDER_MARKER));
    for scenario in &scenarios {
        assert!(output.contains(scenario.as_str()), "missing scenario {}", scenario);
    }
    let written = std::fs::read_to_string(temp_dir.path().join("tests/test_calc.py"))
        .expect("Failed to read placeholder file");
    assert_eq!(written, output);

    let events = drain(&mut receiver);
    assert!(matches!(
        events.first().map(|e| &e.event),
        Some(OrchestratorEvent::BatchStart { degraded: true, .. })
    ));
}

#[tokio::test]
async fn test_timeout_is_retried_then_fails() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tool = tool_script(temp_dir.path(), "tool", "sleep 30");
    let config = fast_config(tool)
        .with_retry_attempts(2)
        .with_timeout(Duration::from_millis(400));
    let orchestrator = TaskOrchestrator::new(config);

    let results = assert_ok!(
        orchestrator
            .process_batch(Batch::new(python_tasks(temp_dir.path(), 1), 1))
            .await
    );

    let result = &results[0];
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(result.attempts, 2);
    assert_eq!(orchestrator.stats().retries, 1);
}

#[tokio::test]
async fn test_malformed_output_fails_only_that_task() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tool = tool_script(
        temp_dir.path(),
        "tool",
        &format!(
            "case \"$*\" in\n  *module_1*) echo 'not json at all' ;;\n  *) {} ;;\nesac",
            json_reply("def test_ok(): pass")
        ),
    );
    let orchestrator = TaskOrchestrator::new(fast_config(tool));

    let results = assert_ok!(
        orchestrator
            .process_batch(Batch::new(python_tasks(temp_dir.path(), 3), 3))
            .await
    );

    assert!(results[0].success);
    assert_eq!(results[1].error_kind, Some(ErrorKind::ResponseParse));
    assert_eq!(results[1].attempts, 1);
    assert!(results[2].success);

    let status = orchestrator.get_reliability_status();
    assert_eq!(status.processed, 3);
    assert!((status.failure_rate - 1.0 / 3.0).abs() < 1e-9);
}
