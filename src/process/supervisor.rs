//! Runs one task as a supervised invocation of the external tool.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{OrchestratorConfig, DEFAULT_MODEL};
use crate::error::TaskError;
use crate::events::{EventEmitter, OrchestratorEvent};
use crate::task::Task;
use crate::timeout::{HeartbeatEvent, TimeoutConfig};

use super::classifier::{classify, Verdict};
use super::handle::{ProcessHandle, Settlement};
use super::output::{parse_output, RawOutput};
use super::registry::ProcessRegistry;

/// Characters of stderr kept in an execution error.
const STDERR_TAIL_CHARS: usize = 2000;

/// Executes a task and produces its raw output.
///
/// `cancel` flips to `true` when the run is being cancelled; implementations
/// must stop promptly and fail with [`TaskError::Cancelled`].
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task, cancel: watch::Receiver<bool>) -> Result<RawOutput, TaskError>;
}

/// Process supervisor for the external code-generation tool.
pub struct Supervisor {
    config: OrchestratorConfig,
    timeouts: TimeoutConfig,
    registry: ProcessRegistry,
    events: EventEmitter,
}

impl Supervisor {
    pub fn new(config: OrchestratorConfig, registry: ProcessRegistry, events: EventEmitter) -> Self {
        let timeouts = config.timeout_config();
        Self {
            config,
            timeouts,
            registry,
            events,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Arguments for one invocation.
    pub fn arguments(&self, task: &Task, model: &str) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            task.prompt.clone(),
            "--model".to_string(),
            model.to_string(),
        ];
        // The tool rejects a fallback equal to the main model
        if !self.config.fallback_model.is_empty() && self.config.fallback_model != model {
            args.push("--fallback-model".to_string());
            args.push(self.config.fallback_model.clone());
        }
        args.push("--output-format".to_string());
        args.push(self.config.output_format.as_arg().to_string());
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    fn command(&self, task: &Task, model: &str) -> Command {
        let mut command = Command::new(&self.config.command);
        command.args(self.arguments(task, model));
        command
    }

    async fn run_once(
        &self,
        task: &Task,
        model: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RawOutput, TaskError> {
        if *cancel.borrow() {
            return Err(TaskError::Cancelled);
        }

        let mut handle = ProcessHandle::spawn(
            &task.id,
            self.command(task, model),
            self.timeouts.clone(),
            &self.registry,
        )
        .map_err(|err| TaskError::Spawn {
            command: self.config.command.display().to_string(),
            message: err.to_string(),
        })?;

        let pid = handle.pid();
        debug!(task_id = %task.id, pid = ?pid, model, "spawned tool process");

        let events = self.events.clone();
        let settlement = handle
            .settle(&mut cancel, |event| report_heartbeat(&events, &task.id, pid, event))
            .await;

        if settlement.needs_termination() {
            match &settlement {
                Settlement::Fatal(kind, line) => {
                    warn!(task_id = %task.id, pid = ?pid, ?kind, line = %line, "fatal output detected, terminating");
                }
                Settlement::Dead { idle } => {
                    warn!(task_id = %task.id, pid = ?pid, idle_ms = idle.as_millis() as u64, "process unresponsive, terminating");
                }
                Settlement::TimedOut { elapsed } => {
                    warn!(task_id = %task.id, pid = ?pid, elapsed_ms = elapsed.as_millis() as u64, "process timed out, terminating");
                }
                _ => info!(task_id = %task.id, pid = ?pid, "cancelling process"),
            }
            handle.terminate(self.timeouts.kill_grace).await;
        }

        let captured = handle.finish().await;
        if self.config.verbose && !captured.stderr.trim().is_empty() {
            info!(task_id = %task.id, stderr = %captured.stderr.trim(), "tool stderr");
        }

        match settlement {
            Settlement::Exited(Some(0)) => {
                parse_output(self.config.output_format, &captured.stdout, &task.prompt, model)
            }
            Settlement::Exited(code) => {
                let fatal = captured
                    .late_fatal
                    .clone()
                    .or_else(|| classify_lines(&captured.stdout));
                match fatal {
                    Some((kind, line)) => Err(kind.into_error(line)),
                    None => Err(TaskError::Execution {
                        code,
                        stderr: tail(&captured.stderr, STDERR_TAIL_CHARS),
                    }),
                }
            }
            Settlement::WaitFailed(message) => Err(TaskError::Execution {
                code: None,
                stderr: message,
            }),
            Settlement::Fatal(kind, line) => Err(kind.into_error(line)),
            Settlement::Dead { idle } => Err(TaskError::Stalled(idle)),
            Settlement::TimedOut { .. } => Err(TaskError::Timeout(self.timeouts.task_timeout)),
            Settlement::Cancelled => Err(TaskError::Cancelled),
        }
    }
}

#[async_trait]
impl TaskExecutor for Supervisor {
    async fn execute(&self, task: &Task, cancel: watch::Receiver<bool>) -> Result<RawOutput, TaskError> {
        let model = self.config.model.as_str();
        match self.run_once(task, model, cancel.clone()).await {
            Err(TaskError::ModelConfiguration(message)) if model != DEFAULT_MODEL => {
                warn!(
                    task_id = %task.id,
                    model,
                    fallback = DEFAULT_MODEL,
                    error = %message,
                    "model rejected by tool, retrying with default model"
                );
                self.run_once(task, DEFAULT_MODEL, cancel).await
            }
            other => other,
        }
    }
}

fn report_heartbeat(events: &EventEmitter, task_id: &str, pid: Option<u32>, event: &HeartbeatEvent) {
    match event {
        HeartbeatEvent::Slow { idle } => {
            info!(task_id, pid = ?pid, idle_ms = idle.as_millis() as u64, "process slow");
            events.emit(OrchestratorEvent::ProcessSlow {
                task_id: task_id.to_string(),
                pid,
                idle_ms: millis(*idle),
            });
        }
        HeartbeatEvent::Dead { idle, .. } => {
            events.emit(OrchestratorEvent::ProcessDead {
                task_id: task_id.to_string(),
                pid,
                idle_ms: millis(*idle),
            });
        }
        HeartbeatEvent::TimeoutWarning {
            percent,
            elapsed,
            remaining,
            resources,
        } => {
            info!(task_id, pid = ?pid, percent, elapsed_ms = millis(*elapsed), "timeout progress");
            events.emit(OrchestratorEvent::TimeoutWarning {
                task_id: task_id.to_string(),
                pid,
                percent: *percent,
                elapsed_ms: millis(*elapsed),
                remaining_ms: millis(*remaining),
                resources: *resources,
            });
        }
        HeartbeatEvent::TimedOut { elapsed } => {
            events.emit(OrchestratorEvent::TimeoutWarning {
                task_id: task_id.to_string(),
                pid,
                percent: 100,
                elapsed_ms: millis(*elapsed),
                remaining_ms: 0,
                resources: None,
            });
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// First fatal line in already-captured output.
fn classify_lines(text: &str) -> Option<(super::classifier::FatalKind, String)> {
    text.lines().map(str::trim).find_map(|line| match classify(line) {
        Verdict::Fatal(kind) => Some((kind, line.to_string())),
        _ => None,
    })
}

fn tail(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(count - max_chars).collect()
    }
}
