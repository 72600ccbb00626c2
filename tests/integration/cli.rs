//! Integration tests for the `testgen` binary.
//!
//! These run the binary with a scripted stand-in for the external tool and
//! check exit codes and printed output.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Batch with three independent tasks writing to different targets.
fn batch_json(dir: &Path) -> String {
    let tasks: Vec<serde_json::Value> = ["alpha", "beta", "gamma"]
        .iter()
        .enumerate()
        .map(|(i, name)| {
            serde_json::json!({
                "id": format!("TG-00{}", i + 1),
                "sourceFile": format!("src/{}.py", name),
                "testFile": dir.join(format!("tests/test_{}.py", name)),
                "priority": 3 - i,
                "complexity": 1,
                "prompt": format!("Write tests for {}", name),
                "context": { "language": "python", "missingScenarios": ["handles empty input"] }
            })
        })
        .collect();
    serde_json::json!({ "tasks": tasks, "maxConcurrency": 3 }).to_string()
}

/// Get a Command instance for the testgen binary
#[allow(deprecated)]
fn testgen_cmd() -> Command {
    Command::cargo_bin("testgen").expect("Failed to find testgen binary")
}

#[test]
fn test_run_help_shows_options() {
    testgen_cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--batch"))
        .stdout(predicate::str::contains("--max-concurrency"))
        .stdout(predicate::str::contains("--degrade"));
}

#[test]
fn test_missing_batch_file_is_run_error() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    testgen_cmd()
        .current_dir(temp_dir.path())
        .args(["run", "--batch", "missing.json"])
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_invalid_config_is_run_error() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let batch_path = temp_dir.path().join("batch.json");
    fs::write(&batch_path, batch_json(temp_dir.path())).expect("Failed to write batch");

    testgen_cmd()
        .args(["run", "--batch"])
        .arg(&batch_path)
        .args(["--max-concurrency", "0"])
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("max_concurrent"));
}

#[cfg(unix)]
mod with_tool {
    use super::*;
    use crate::common::{json_reply, tool_script};

    #[test]
    fn test_run_completes_batch() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tool = tool_script(temp_dir.path(), "tool", &json_reply("def test_ok():\n    pass"));
        let batch_path = temp_dir.path().join("batch.json");
        fs::write(&batch_path, batch_json(temp_dir.path())).expect("Failed to write batch");

        testgen_cmd()
            .env("TESTGEN_COMMAND", &tool)
            .args(["run", "--batch"])
            .arg(&batch_path)
            .timeout(std::time::Duration::from_secs(30))
            .assert()
            .success()
            .stdout(predicate::str::contains("Completed:        3"))
            .stdout(predicate::str::contains("3 of 3 tasks completed"));

        let written = fs::read_to_string(temp_dir.path().join("tests/test_beta.py"))
            .expect("Failed to read generated test");
        assert_eq!(written, "def test_ok():\n    pass");
    }

    #[test]
    fn test_run_with_failures_exits_one_and_lists_them() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tool = tool_script(temp_dir.path(), "tool", "echo 'Invalid API key' >&2\nexit 1");
        let batch_path = temp_dir.path().join("batch.json");
        fs::write(&batch_path, batch_json(temp_dir.path())).expect("Failed to write batch");

        testgen_cmd()
            .env("TESTGEN_COMMAND", &tool)
            .args(["run", "--batch"])
            .arg(&batch_path)
            .timeout(std::time::Duration::from_secs(30))
            .assert()
            .code(1)
            .stdout(predicate::str::contains("Failed tasks"))
            .stdout(predicate::str::contains("TG-002 [authentication]"));
    }

    #[test]
    fn test_run_degrade_writes_placeholders() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tool = tool_script(temp_dir.path(), "tool", "echo 'Invalid API key' >&2\nexit 1");
        let batch_path = temp_dir.path().join("batch.json");
        fs::write(&batch_path, batch_json(temp_dir.path())).expect("Failed to write batch");

        let output = testgen_cmd()
            .env("TESTGEN_COMMAND", &tool)
            .args(["run", "--degrade", "--json", "--batch"])
            .arg(&batch_path)
            .timeout(std::time::Duration::from_secs(30))
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        let results: Vec<serde_json::Value> =
            serde_json::from_slice(&output).expect("stdout is a JSON result list");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["taskId"], "TG-001");
        assert!(results.iter().all(|r| r["degraded"] == true && r["tokensUsed"] == 0));

        let placeholder = fs::read_to_string(temp_dir.path().join("tests/test_alpha.py"))
            .expect("Failed to read placeholder");
        assert!(placeholder.contains("handles empty input"));
    }

    #[test]
    fn test_probe_reports_tool_status() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let tool = tool_script(temp_dir.path(), "tool", "echo '2.1.0 (scripted)'");

        testgen_cmd()
            .env("TESTGEN_COMMAND", &tool)
            .arg("probe")
            .timeout(std::time::Duration::from_secs(30))
            .assert()
            .success()
            .stdout(predicate::str::contains("2.1.0 (scripted)"));
    }

    #[test]
    fn test_probe_fails_for_missing_tool() {
        testgen_cmd()
            .env("TESTGEN_COMMAND", "/nonexistent/testgen-tool")
            .arg("probe")
            .timeout(std::time::Duration::from_secs(30))
            .assert()
            .code(1)
            .stdout(predicate::str::contains("not usable"));
    }
}
