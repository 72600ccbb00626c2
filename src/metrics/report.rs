//! Human-readable batch report.

use std::fmt::Write;
use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::task::TaskResult;

use super::{BatchStats, ReliabilityStatus};

/// Renders the configuration echo, summary counts and every failed task.
pub fn render_report(
    config: &OrchestratorConfig,
    stats: &BatchStats,
    reliability: &ReliabilityStatus,
    failures: &[TaskResult],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Test Generation Report");
    let _ = writeln!(out, "======================");
    let _ = writeln!(out);

    let _ = writeln!(out, "Configuration");
    row(&mut out, "Command", config.command.display());
    row(
        &mut out,
        "Model",
        format!("{} (fallback: {})", config.model, config.fallback_model),
    );
    row(&mut out, "Max concurrency", config.max_concurrent);
    row(
        &mut out,
        "Retry attempts",
        format!(
            "{} (delay {}ms, {})",
            config.retry_attempts,
            config.retry_delay_ms,
            if config.exponential_backoff {
                "exponential backoff"
            } else {
                "constant delay"
            }
        ),
    );
    row(&mut out, "Timeout", format!("{}ms", config.timeout_ms));
    row(&mut out, "Output format", config.output_format.as_arg());
    row(&mut out, "Degradation", enabled(config.graceful_degradation));
    row(
        &mut out,
        "Circuit breaker",
        if config.circuit_breaker {
            format!(
                "enabled (threshold {}, recovery {}ms)",
                config.failure_threshold, config.recovery_timeout_ms
            )
        } else {
            "disabled".to_string()
        },
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "Summary");
    row(&mut out, "Total tasks", stats.total_tasks);
    row(&mut out, "Completed", stats.completed_tasks);
    row(&mut out, "Failed", stats.failed_tasks);
    if stats.degraded_tasks > 0 {
        row(&mut out, "Placeholders", stats.degraded_tasks);
    }
    row(&mut out, "Retries", stats.retries);
    row(&mut out, "Tokens used", stats.tokens_used);
    row(&mut out, "Total cost", format!("${:.4}", stats.total_cost));
    row(
        &mut out,
        "Duration",
        format!(
            "{} (avg task {})",
            seconds(stats.run_duration),
            seconds(stats.durations.mean)
        ),
    );
    row(
        &mut out,
        "Success rate",
        format!("{:.1}%", reliability.success_rate * 100.0),
    );
    if let Some(state) = reliability.circuit_state {
        row(&mut out, "Circuit state", state);
    }

    if !failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Failed tasks");
        for failure in failures {
            let kind = failure
                .error_kind
                .map(|kind| kind.as_label())
                .unwrap_or("unknown");
            let _ = writeln!(
                out,
                "  - {} [{}]: {}",
                failure.task_id,
                kind,
                failure.error.as_deref().unwrap_or("no error message")
            );
        }
    }

    out
}

fn row(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "  {:<18}{}", format!("{}:", label), value);
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

fn seconds(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}
