//! Task, batch and result types exchanged with upstream and downstream
//! collaborators.
//!
//! Field names follow the JSON produced by the planning stage (camelCase).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, TaskError};
use crate::error::{OrchestratorError, Result};

/// Lifecycle status of a task. Only the scheduler changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Context attached to a task by the planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    /// Test scenarios the generated output should cover.
    #[serde(default)]
    pub missing_scenarios: Vec<String>,
    /// Source language, e.g. `python` or `typescript`.
    #[serde(default)]
    pub language: Option<String>,
    /// Test framework, e.g. `pytest` or `jest`.
    #[serde(default)]
    pub framework: Option<String>,
    /// Anything else the planner attached.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One unit of generation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    /// Source artifact the tests are generated for.
    #[serde(alias = "sourceFile")]
    pub source_path: PathBuf,
    /// File the generated content is written to.
    #[serde(alias = "testFile")]
    pub target_path: PathBuf,
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub complexity: f64,
    pub prompt: String,
    #[serde(default)]
    pub context: TaskContext,
    #[serde(default)]
    pub estimated_tokens: u64,
    #[serde(default)]
    pub estimated_cost: f64,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_path: source_path.into(),
            target_path: target_path.into(),
            priority: 0.0,
            complexity: 0.0,
            prompt: prompt.into(),
            context: TaskContext::default(),
            estimated_tokens: 0,
            estimated_cost: 0.0,
            status: TaskStatus::Pending,
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_missing_scenarios(mut self, scenarios: Vec<String>) -> Self {
        self.context.missing_scenarios = scenarios;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.context.language = Some(language.into());
        self
    }
}

/// A set of tasks submitted together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub tasks: Vec<Task>,
    #[serde(default = "default_batch_concurrency")]
    pub max_concurrency: usize,
}

fn default_batch_concurrency() -> usize {
    3
}

impl Batch {
    pub fn new(tasks: Vec<Task>, max_concurrency: usize) -> Self {
        Self {
            tasks,
            max_concurrency,
        }
    }

    /// Reads a batch from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let batch: Batch = serde_json::from_str(&content).map_err(|err| {
            OrchestratorError::workflow("load", format!("{}: {}", path.display(), err))
        })?;
        if let Some(duplicate) = batch.duplicate_id() {
            return Err(OrchestratorError::DuplicateTaskId(duplicate.to_string()));
        }
        Ok(batch)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.tasks.iter().map(|t| t.estimated_tokens).sum()
    }

    pub fn estimated_cost(&self) -> f64 {
        self.tasks.iter().map(|t| t.estimated_cost).sum()
    }

    /// First task id that appears more than once.
    pub fn duplicate_id(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.tasks
            .iter()
            .find(|t| !seen.insert(t.id.as_str()))
            .map(|t| t.id.as_str())
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub tokens_used: u64,
    /// Cost in US dollars.
    pub actual_cost: f64,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub attempts: u32,
    /// Output is a placeholder, not generated content.
    pub degraded: bool,
}

impl TaskResult {
    pub fn succeeded(
        task_id: impl Into<String>,
        output: String,
        tokens_used: u64,
        actual_cost: f64,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            output: Some(output),
            error: None,
            error_kind: None,
            tokens_used,
            actual_cost,
            duration,
            attempts,
            degraded: false,
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        error: &TaskError,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            tokens_used: 0,
            actual_cost: 0.0,
            duration,
            attempts,
            degraded: false,
        }
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
