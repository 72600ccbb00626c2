//! Registry of live supervised processes, owned by one orchestrator.
//!
//! Entries are added when a process is spawned and removed when its
//! [`Registration`] guard drops, so a worker that settles by any path
//! (success, failure, cancellation, panic) leaves no stale entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

/// Public view of one live process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub task_id: String,
    pub pid: Option<u32>,
    #[serde(skip)]
    pub started_at: Instant,
}

impl ProcessInfo {
    pub fn running_for(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[derive(Debug)]
struct Inner {
    processes: Mutex<HashMap<String, ProcessInfo>>,
    count: watch::Sender<usize>,
}

/// Mapping from task id to its live process. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    inner: Arc<Inner>,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                processes: Mutex::new(HashMap::new()),
                count,
            }),
        }
    }

    /// Registers a process; it stays registered until the guard drops.
    pub fn register(&self, task_id: impl Into<String>, pid: Option<u32>) -> Registration {
        let task_id = task_id.into();
        if let Ok(mut processes) = self.inner.processes.lock() {
            processes.insert(
                task_id.clone(),
                ProcessInfo {
                    task_id: task_id.clone(),
                    pid,
                    started_at: Instant::now(),
                },
            );
            self.inner.count.send_replace(processes.len());
        }
        Registration {
            registry: self.clone(),
            task_id,
        }
    }

    fn remove(&self, task_id: &str) {
        if let Ok(mut processes) = self.inner.processes.lock() {
            processes.remove(task_id);
            self.inner.count.send_replace(processes.len());
        }
    }

    pub fn len(&self) -> usize {
        *self.inner.count.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, task_id: &str) -> Option<ProcessInfo> {
        self.inner
            .processes
            .lock()
            .ok()
            .and_then(|processes| processes.get(task_id).cloned())
    }

    /// Snapshot of all live processes, ordered by task id.
    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut list: Vec<ProcessInfo> = match self.inner.processes.lock() {
            Ok(processes) => processes.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        list.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        list
    }

    /// Waits until no process is registered.
    pub async fn wait_empty(&self) {
        let mut count = self.inner.count.subscribe();
        // The sender lives in `self`, so this only errors if it is dropped
        let _ = count.wait_for(|n| *n == 0).await;
    }
}

/// Guard for one registry entry.
#[derive(Debug)]
pub struct Registration {
    registry: ProcessRegistry,
    task_id: String,
}

impl Registration {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.task_id);
    }
}
