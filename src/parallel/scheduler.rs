//! Bounded worker pool that drains a batch through the process supervisor.
//!
//! [`TaskOrchestrator::process_batch`] pops tasks from a shared priority
//! queue with `min(batch.max_concurrency, config.max_concurrent)` workers.
//! Each worker owns one task at a time: it runs the task through the retry
//! policy and the circuit breaker, writes successful output to the task's
//! target path and records the result. A task failure never stops the pool.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{ErrorKind, OrchestratorError, Result, TaskError};
use crate::events::{EventEmitter, OrchestratorEvent};
use crate::metrics::{render_report, BatchStats, ReliabilityStatus, ResultAggregator};
use crate::process::{
    placeholder_output, AuthProbe, CommandProbe, ProcessInfo, ProcessRegistry, RawOutput,
    Supervisor, TaskExecutor,
};
use crate::resilience::{with_retry_notify, CircuitBreaker, CircuitState, RetryOptions, RetryState};
use crate::task::{Batch, Task, TaskResult, TaskStatus};

use super::queue::TaskQueue;

/// Tracks task status across a batch.
///
/// The scheduler is the only writer; every task moves pending → in-flight →
/// completed or failed exactly once.
#[derive(Clone, Debug, Default)]
pub struct ExecutionState {
    /// Tasks not yet picked up by a worker.
    pub pending: HashSet<String>,
    /// Tasks a worker is currently running.
    pub in_flight: HashSet<String>,
    /// Tasks that completed successfully.
    pub completed: HashSet<String>,
    /// Tasks that failed, mapped to the error message.
    pub failed: HashMap<String, String>,
}

impl ExecutionState {
    /// Fresh state with every task pending.
    pub fn for_batch(batch: &Batch) -> Self {
        Self {
            pending: batch.tasks.iter().map(|t| t.id.clone()).collect(),
            ..Self::default()
        }
    }

    pub fn start(&mut self, task_id: &str) {
        self.pending.remove(task_id);
        self.in_flight.insert(task_id.to_string());
    }

    /// Moves a task to its terminal status.
    pub fn settle(&mut self, result: &TaskResult) {
        self.pending.remove(&result.task_id);
        self.in_flight.remove(&result.task_id);
        if result.success {
            self.completed.insert(result.task_id.clone());
        } else {
            self.failed.insert(
                result.task_id.clone(),
                result.error.clone().unwrap_or_default(),
            );
        }
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        if self.completed.contains(task_id) {
            Some(TaskStatus::Completed)
        } else if self.failed.contains_key(task_id) {
            Some(TaskStatus::Failed)
        } else if self.in_flight.contains(task_id) {
            Some(TaskStatus::InProgress)
        } else if self.pending.contains(task_id) {
            Some(TaskStatus::Pending)
        } else {
            None
        }
    }
}

/// Clears the running flag when a batch ends, including on early return.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Entry point for running batches.
pub struct TaskOrchestrator {
    config: OrchestratorConfig,
    retry_options: RetryOptions,
    executor: Arc<dyn TaskExecutor>,
    probe: Option<Arc<dyn AuthProbe>>,
    registry: ProcessRegistry,
    breaker: Option<CircuitBreaker>,
    aggregator: ResultAggregator,
    events: EventEmitter,
    state: Arc<Mutex<ExecutionState>>,
    running: AtomicBool,
    degraded: AtomicBool,
    cancel_tx: watch::Sender<bool>,
}

impl TaskOrchestrator {
    /// Orchestrator driving the configured external tool, without events.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_events(config, EventEmitter::disabled())
    }

    /// Orchestrator driving the configured external tool.
    ///
    /// With graceful degradation enabled, a [`CommandProbe`] checks the tool
    /// before each batch.
    pub fn with_events(config: OrchestratorConfig, events: EventEmitter) -> Self {
        let registry = ProcessRegistry::new();
        let supervisor = Supervisor::new(config.clone(), registry.clone(), events.clone());
        let probe: Option<Arc<dyn AuthProbe>> = if config.graceful_degradation {
            Some(Arc::new(CommandProbe::from_config(&config)))
        } else {
            None
        };
        Self::from_parts(config, Arc::new(supervisor), registry, probe, events)
    }

    /// Orchestrator over an arbitrary executor.
    ///
    /// `registry` must be the one the executor registers its processes in,
    /// otherwise [`cancel_all`](Self::cancel_all) cannot wait for them.
    pub fn from_parts(
        config: OrchestratorConfig,
        executor: Arc<dyn TaskExecutor>,
        registry: ProcessRegistry,
        probe: Option<Arc<dyn AuthProbe>>,
        events: EventEmitter,
    ) -> Self {
        let breaker = config.circuit_breaker.then(|| {
            CircuitBreaker::new(
                config.failure_threshold,
                Duration::from_millis(config.recovery_timeout_ms),
            )
        });
        let breaker_state = breaker.clone();
        let aggregator =
            ResultAggregator::new(move || breaker_state.as_ref().map(|breaker| breaker.state()));
        let (cancel_tx, _) = watch::channel(false);

        Self {
            retry_options: config.retry_options(),
            config,
            executor,
            probe,
            registry,
            breaker,
            aggregator,
            events,
            state: Arc::new(Mutex::new(ExecutionState::default())),
            running: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            cancel_tx,
        }
    }

    /// Replaces the authentication probe.
    pub fn with_probe(mut self, probe: Arc<dyn AuthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the current or last batch ran on placeholder output.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Runs every task in `batch` and returns one result per task, in batch
    /// order.
    ///
    /// Fails with [`OrchestratorError::AlreadyRunning`] when another batch is
    /// still running on this orchestrator, and with
    /// [`OrchestratorError::DuplicateTaskId`] when task ids are not unique.
    pub async fn process_batch(&self, batch: Batch) -> Result<Vec<TaskResult>> {
        if let Some(duplicate) = batch.duplicate_id() {
            return Err(OrchestratorError::DuplicateTaskId(duplicate.to_string()));
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrchestratorError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        self.cancel_tx.send_replace(false);
        self.aggregator.begin(batch.len());
        if let Ok(mut state) = self.state.lock() {
            *state = ExecutionState::for_batch(&batch);
        }

        let degraded = self.check_degradation().await;
        self.degraded.store(degraded, Ordering::SeqCst);

        let total = batch.len();
        let concurrency = batch.max_concurrency.min(self.config.max_concurrent).max(1);
        let started = Instant::now();
        info!(total, concurrency, degraded, "starting batch");
        self.events.emit(OrchestratorEvent::BatchStart {
            total_tasks: total,
            concurrency,
            degraded,
        });

        let queue = TaskQueue::new(batch.tasks);
        let results = Mutex::new(Vec::with_capacity(total));
        let workers = (0..concurrency.min(total)).map(|worker| self.worker(worker, &queue, &results, total));
        join_all(workers).await;

        // Tasks still queued were never started because the run was cancelled
        for (index, task) in queue.drain() {
            let result = TaskResult::failed(&task.id, &TaskError::Cancelled, Duration::ZERO, 0);
            self.record(&result, total);
            push_result(&results, index, result);
        }

        self.aggregator.finish();
        let mut results = results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        results.sort_by_key(|(index, _)| *index);
        let results: Vec<TaskResult> = results.into_iter().map(|(_, result)| result).collect();

        let stats = self.aggregator.snapshot();
        info!(
            completed = stats.completed_tasks,
            failed = stats.failed_tasks,
            duration_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        self.events.emit(OrchestratorEvent::BatchComplete {
            completed: stats.completed_tasks,
            failed: stats.failed_tasks,
            duration_ms: started.elapsed().as_millis() as u64,
        });

        Ok(results)
    }

    /// Signals every running process to terminate and waits until all of
    /// them have exited. Tasks not started yet are never started.
    pub async fn cancel_all(&self) {
        let active = self.registry.len();
        info!(active, "cancelling all tasks");
        self.cancel_tx.send_replace(true);
        self.registry.wait_empty().await;
        debug!("all processes exited after cancellation");
    }

    /// Health snapshot: success/failure rates and circuit state.
    pub fn get_reliability_status(&self) -> ReliabilityStatus {
        self.aggregator.reliability_status()
    }

    /// Human-readable report of the current or last batch.
    pub fn generate_report(&self) -> String {
        render_report(
            &self.config,
            &self.aggregator.snapshot(),
            &self.aggregator.reliability_status(),
            &self.aggregator.failures(),
        )
    }

    pub fn stats(&self) -> BatchStats {
        self.aggregator.snapshot()
    }

    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.state.lock().ok()?.status(task_id)
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    /// Processes running right now.
    pub fn active_processes(&self) -> Vec<ProcessInfo> {
        self.registry.list()
    }

    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.breaker.as_ref().map(|breaker| breaker.state())
    }

    async fn check_degradation(&self) -> bool {
        if !self.config.graceful_degradation {
            return false;
        }
        let Some(probe) = &self.probe else {
            return false;
        };
        let status = probe.probe().await;
        if status.should_degrade() {
            warn!(message = %status.message, "external tool unavailable, using placeholder output");
            true
        } else {
            if !status.authenticated {
                warn!(message = %status.message, "authentication probe failed, running anyway");
            }
            false
        }
    }

    async fn worker(
        &self,
        worker: usize,
        queue: &TaskQueue,
        results: &Mutex<Vec<(usize, TaskResult)>>,
        total: usize,
    ) {
        let cancel = self.cancel_tx.subscribe();
        loop {
            if *cancel.borrow() {
                debug!(worker, "worker stopping after cancellation");
                break;
            }
            let Some((index, mut task)) = queue.pop() else {
                break;
            };
            task.status = TaskStatus::InProgress;
            if let Ok(mut state) = self.state.lock() {
                state.start(&task.id);
            }

            let result = self.run_task(&task, &cancel).await;
            self.record(&result, total);
            push_result(results, index, result);
        }
    }

    async fn run_task(&self, task: &Task, cancel: &watch::Receiver<bool>) -> TaskResult {
        let started = Instant::now();
        if self.degraded.load(Ordering::SeqCst) {
            self.events.emit(OrchestratorEvent::TaskStart {
                task_id: task.id.clone(),
                attempt: 1,
            });
            return self.complete(task, placeholder_output(task), started, 1).await;
        }

        let executor = &self.executor;
        let breaker = self.breaker.as_ref();
        let events = &self.events;
        let outcome = with_retry_notify(
            &self.retry_options,
            |attempt| {
                let cancel = cancel.clone();
                async move {
                    if *cancel.borrow() {
                        return Err(TaskError::Cancelled);
                    }
                    debug!(task_id = %task.id, attempt, "starting attempt");
                    events.emit(OrchestratorEvent::TaskStart {
                        task_id: task.id.clone(),
                        attempt,
                    });
                    match breaker {
                        Some(breaker) => breaker
                            .call_counting(
                                || executor.execute(task, cancel),
                                |err: &TaskError| !matches!(err, TaskError::Cancelled),
                            )
                            .await
                            .map_err(TaskError::from),
                        None => executor.execute(task, cancel).await,
                    }
                }
            },
            |retry: &RetryState<TaskError>| {
                warn!(
                    task_id = %task.id,
                    attempt = retry.attempt,
                    delay_ms = retry.next_delay.as_millis() as u64,
                    error = %retry.last_error,
                    "attempt failed, retrying"
                );
                events.emit(OrchestratorEvent::TaskRetry {
                    task_id: task.id.clone(),
                    attempt: retry.attempt,
                    delay_ms: retry.next_delay.as_millis() as u64,
                    error: retry.last_error.to_string(),
                });
            },
        )
        .await;

        match outcome.result {
            Ok(output) => self.complete(task, output, started, outcome.attempts).await,
            Err(TaskError::Authentication(message)) if self.config.graceful_degradation => {
                warn!(
                    task_id = %task.id,
                    error = %message,
                    "authentication failed, switching to placeholder output"
                );
                self.degraded.store(true, Ordering::SeqCst);
                self.complete(task, placeholder_output(task), started, outcome.attempts)
                    .await
            }
            Err(err) => TaskResult::failed(&task.id, &err, started.elapsed(), outcome.attempts),
        }
    }

    /// Writes successful output to the task's target and builds the result.
    async fn complete(
        &self,
        task: &Task,
        output: RawOutput,
        started: Instant,
        attempts: u32,
    ) -> TaskResult {
        if let Err(err) = write_output(&task.target_path, &output.content).await {
            return TaskResult::failed(&task.id, &err, started.elapsed(), attempts);
        }
        let result = TaskResult::succeeded(
            &task.id,
            output.content,
            output.tokens_used,
            output.cost,
            started.elapsed(),
            attempts,
        );
        if output.degraded {
            result.degraded()
        } else {
            result
        }
    }

    fn record(&self, result: &TaskResult, total: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.settle(result);
        }
        self.aggregator.record(result);

        let duration_ms = result.duration.as_millis() as u64;
        if result.success {
            info!(
                task_id = %result.task_id,
                duration_ms,
                tokens = result.tokens_used,
                attempts = result.attempts,
                degraded = result.degraded,
                "task completed"
            );
            self.events.emit(OrchestratorEvent::TaskComplete {
                task_id: result.task_id.clone(),
                duration_ms,
                tokens_used: result.tokens_used,
                degraded: result.degraded,
            });
        } else {
            let error = result.error.clone().unwrap_or_default();
            warn!(
                task_id = %result.task_id,
                duration_ms,
                attempts = result.attempts,
                error = %error,
                "task failed"
            );
            self.events.emit(OrchestratorEvent::TaskFailed {
                task_id: result.task_id.clone(),
                duration_ms,
                kind: result.error_kind.unwrap_or(ErrorKind::Execution),
                error,
            });
        }

        let stats = self.aggregator.snapshot();
        self.events.emit(OrchestratorEvent::Progress {
            completed: stats.completed_tasks,
            failed: stats.failed_tasks,
            total,
        });
    }
}

fn push_result(results: &Mutex<Vec<(usize, TaskResult)>>, index: usize, result: TaskResult) {
    if let Ok(mut results) = results.lock() {
        results.push((index, result));
    }
}

/// Appends to a target that already has content, otherwise creates it.
async fn write_output(path: &Path, content: &str) -> std::result::Result<(), TaskError> {
    let failure = |err: std::io::Error| TaskError::OutputWrite {
        path: path.display().to_string(),
        message: err.to_string(),
    };

    let has_content = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.len() > 0,
        Err(_) => false,
    };

    if has_content {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(failure)?;
        file.write_all(format!("\n\n{}", content).as_bytes())
            .await
            .map_err(failure)?;
        file.flush().await.map_err(failure)?;
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(failure)?;
        }
        tokio::fs::write(path, content).await.map_err(failure)?;
    }
    Ok(())
}
