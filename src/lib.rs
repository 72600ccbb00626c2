//! Supervised, concurrent orchestration of an external AI code-generation
//! command for automated test generation.
//!
//! A [`TaskOrchestrator`] takes a [`Batch`] of tasks and drives the external
//! tool as a pool of supervised subprocesses: it bounds concurrency, watches
//! each process for liveness, classifies its output to stop unrecoverable
//! failures early, retries transient ones and trips a circuit breaker under
//! sustained failure. Results are aggregated into [`BatchStats`] and a
//! human-readable report.
//!
//! ```no_run
//! use testgen::{Batch, OrchestratorConfig, TaskOrchestrator};
//!
//! # async fn run() -> testgen::Result<()> {
//! let config = OrchestratorConfig::load(None)?;
//! let orchestrator = TaskOrchestrator::new(config);
//! let batch = Batch::load(std::path::Path::new("tasks.json"))?;
//! let results = orchestrator.process_batch(batch).await?;
//! println!("{}", orchestrator.generate_report());
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod parallel;
pub mod process;
pub mod resilience;
pub mod task;
pub mod timeout;
pub mod usage;

pub use config::{OrchestratorConfig, OutputFormat};
pub use error::{ErrorKind, OrchestratorError, Result, TaskError};
pub use events::{EventEmitter, OrchestratorEvent, TimedEvent};
pub use metrics::{BatchStats, ReliabilityStatus};
pub use parallel::TaskOrchestrator;
pub use task::{Batch, Task, TaskResult, TaskStatus};
