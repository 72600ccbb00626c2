//! Typed orchestration events.
//!
//! Events are delivered over an unbounded channel in emission order. The
//! emitter is optional: without a subscriber, emitting is a no-op.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::ErrorKind;
use crate::timeout::ResourceUsage;

/// An event with the time it was emitted.
#[derive(Debug, Clone, Serialize)]
pub struct TimedEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: OrchestratorEvent,
}

/// Everything the orchestrator reports while a batch runs.
///
/// Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum OrchestratorEvent {
    #[serde(rename = "batch:start")]
    BatchStart {
        total_tasks: usize,
        concurrency: usize,
        degraded: bool,
    },
    #[serde(rename = "batch:complete")]
    BatchComplete {
        completed: usize,
        failed: usize,
        duration_ms: u64,
    },
    #[serde(rename = "task:start")]
    TaskStart { task_id: String, attempt: u32 },
    #[serde(rename = "task:retry")]
    TaskRetry {
        task_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    #[serde(rename = "task:complete")]
    TaskComplete {
        task_id: String,
        duration_ms: u64,
        tokens_used: u64,
        degraded: bool,
    },
    #[serde(rename = "task:failed")]
    TaskFailed {
        task_id: String,
        duration_ms: u64,
        kind: ErrorKind,
        error: String,
    },
    #[serde(rename = "process:slow")]
    ProcessSlow {
        task_id: String,
        pid: Option<u32>,
        idle_ms: u64,
    },
    #[serde(rename = "process:dead")]
    ProcessDead {
        task_id: String,
        pid: Option<u32>,
        idle_ms: u64,
    },
    #[serde(rename = "timeout:warning")]
    TimeoutWarning {
        task_id: String,
        pid: Option<u32>,
        percent: u8,
        elapsed_ms: u64,
        remaining_ms: u64,
        resources: Option<ResourceUsage>,
    },
    #[serde(rename = "progress")]
    Progress {
        completed: usize,
        failed: usize,
        total: usize,
    },
}

impl OrchestratorEvent {
    /// Wire name of the event, e.g. `task:start`.
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::BatchStart { .. } => "batch:start",
            OrchestratorEvent::BatchComplete { .. } => "batch:complete",
            OrchestratorEvent::TaskStart { .. } => "task:start",
            OrchestratorEvent::TaskRetry { .. } => "task:retry",
            OrchestratorEvent::TaskComplete { .. } => "task:complete",
            OrchestratorEvent::TaskFailed { .. } => "task:failed",
            OrchestratorEvent::ProcessSlow { .. } => "process:slow",
            OrchestratorEvent::ProcessDead { .. } => "process:dead",
            OrchestratorEvent::TimeoutWarning { .. } => "timeout:warning",
            OrchestratorEvent::Progress { .. } => "progress",
        }
    }
}

/// Sending side of the event stream. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    sender: Option<mpsc::UnboundedSender<TimedEvent>>,
}

impl EventEmitter {
    /// Emitter that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Creates an emitter and the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TimedEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        if let Some(sender) = &self.sender {
            // A dropped receiver only means nobody is listening anymore
            let _ = sender.send(TimedEvent {
                timestamp: Utc::now(),
                event,
            });
        }
    }
}
