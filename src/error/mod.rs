//! Error types for task execution and batch orchestration.
//!
//! Two layers exist:
//! - [`TaskError`] describes why a single task attempt failed. It drives the
//!   retry decision and ends up (as a message) in the task's result.
//! - [`OrchestratorError`] describes run-level failures the caller must handle,
//!   such as re-entering `process_batch` while a batch is still running.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Discriminant of a [`TaskError`], used by retry policies to decide which
/// failures are worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Network,
    RateLimit,
    Timeout,
    ModelConfiguration,
    ResponseParse,
    Execution,
    Spawn,
    CircuitOpen,
    Cancelled,
    OutputWrite,
}

impl ErrorKind {
    /// Stable label used in logs, events and reports.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ModelConfiguration => "model_configuration",
            ErrorKind::ResponseParse => "response_parse",
            ErrorKind::Execution => "execution",
            ErrorKind::Spawn => "spawn",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::OutputWrite => "output_write",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Failure of a single task attempt.
///
/// Variants carrying `fatal: true` were raised by the output classifier while
/// the process was still running. Those short-circuit the retry policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {message}")]
    Network { message: String, fatal: bool },

    #[error("Rate limited: {message}")]
    RateLimit { message: String, fatal: bool },

    #[error("Process timed out after {0:?}")]
    Timeout(Duration),

    #[error("Process produced no output for {0:?} and was terminated")]
    Stalled(Duration),

    #[error("Model configuration error: {0}")]
    ModelConfiguration(String),

    #[error("Failed to parse response: {0}")]
    ResponseParse(String),

    #[error("Process exited with {}: {stderr}", exit_label(*.code))]
    Execution { code: Option<i32>, stderr: String },

    #[error("Failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("Circuit breaker open; retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("Task cancelled")]
    Cancelled,

    #[error("Failed to write output to {path}: {message}")]
    OutputWrite { path: String, message: String },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl TaskError {
    /// Classify the error into its kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Authentication(_) => ErrorKind::Authentication,
            TaskError::Network { .. } => ErrorKind::Network,
            TaskError::RateLimit { .. } => ErrorKind::RateLimit,
            TaskError::Timeout(_) | TaskError::Stalled(_) => ErrorKind::Timeout,
            TaskError::ModelConfiguration(_) => ErrorKind::ModelConfiguration,
            TaskError::ResponseParse(_) => ErrorKind::ResponseParse,
            TaskError::Execution { .. } => ErrorKind::Execution,
            TaskError::Spawn { .. } => ErrorKind::Spawn,
            TaskError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            TaskError::Cancelled => ErrorKind::Cancelled,
            TaskError::OutputWrite { .. } => ErrorKind::OutputWrite,
        }
    }

    /// Whether this error must never be retried regardless of policy.
    pub fn is_fatal(&self) -> bool {
        match self {
            TaskError::Authentication(_)
            | TaskError::ResponseParse(_)
            | TaskError::Cancelled
            | TaskError::ModelConfiguration(_) => true,
            TaskError::Network { fatal, .. } | TaskError::RateLimit { fatal, .. } => *fatal,
            _ => false,
        }
    }
}

/// Run-level errors surfaced to the caller of the orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// `process_batch` was invoked while another batch is still running.
    #[error("A batch is already running on this orchestrator")]
    AlreadyRunning,

    /// Two tasks in one batch share an id.
    #[error("Batch contains duplicate task id '{0}'")]
    DuplicateTaskId(String),

    /// A phase of the workflow failed as a whole.
    #[error("Workflow phase '{phase}' failed: {message}")]
    Workflow { phase: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn workflow(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Workflow {
            phase: phase.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
