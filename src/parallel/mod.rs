//! Batch scheduling.

pub mod queue;
pub mod scheduler;

pub use queue::TaskQueue;
pub use scheduler::{ExecutionState, TaskOrchestrator};
