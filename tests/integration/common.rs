//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use testgen::events::TimedEvent;
use testgen::{OrchestratorConfig, Task};
use tokio::sync::mpsc;

/// Writes an executable `/bin/sh` script standing in for the external tool.
#[cfg(unix)]
pub fn tool_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write tool script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to make tool script executable");
    path
}

/// Script body that answers like the tool in JSON mode.
pub fn json_reply(content: &str) -> String {
    let document = serde_json::json!({
        "result": content,
        "total_cost_usd": 0.002,
        "usage": { "input_tokens": 12, "output_tokens": 30 }
    });
    format!("printf '%s\\n' '{}'", document)
}

/// Configuration with fast retries and liveness checks for tests.
pub fn fast_config(command: PathBuf) -> OrchestratorConfig {
    OrchestratorConfig::new()
        .with_command(command)
        .with_retry_delay(Duration::from_millis(50))
        .with_jitter(false)
        .with_liveness(Duration::from_millis(200), Duration::from_secs(5))
        .with_kill_grace(Duration::from_millis(500))
}

/// `count` tasks whose targets live under `dir`.
pub fn python_tasks(dir: &Path, count: usize) -> Vec<Task> {
    (0..count)
        .map(|i| {
            Task::new(
                format!("task-{}", i),
                format!("src/module_{}.py", i),
                dir.join("tests").join(format!("test_module_{}.py", i)),
                format!("Write pytest tests for module_{}", i),
            )
            .with_language("python")
        })
        .collect()
}

/// Every event still buffered on `receiver`.
pub fn drain(receiver: &mut mpsc::UnboundedReceiver<TimedEvent>) -> Vec<TimedEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
