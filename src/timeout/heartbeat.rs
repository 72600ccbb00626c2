//! Heartbeat monitor for stall and timeout detection.
//!
//! A supervised process reports activity through an [`ActivityTracker`]
//! every time one of its output streams yields data. The [`HeartbeatMonitor`]
//! runs a background task that periodically compares the time since the last
//! activity against the configured thresholds and, independently, tracks the
//! elapsed time against the overall task timeout. Findings are sent through a
//! channel as [`HeartbeatEvent`]s; acting on them is the supervisor's job.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::resources::{self, ResourceUsage};
use super::{TimeoutConfig, MIN_HEARTBEAT_INTERVAL, PROGRESS_THRESHOLDS};

/// Events emitted by the heartbeat monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// No output for longer than one heartbeat interval. Informational.
    Slow {
        /// Time since the last observed activity.
        idle: Duration,
    },
    /// No output for longer than the dead threshold. The monitor stops after
    /// sending this.
    Dead {
        /// Time since the last observed activity.
        idle: Duration,
        /// Threshold that was exceeded.
        threshold: Duration,
    },
    /// The process crossed a progress threshold of its overall timeout.
    TimeoutWarning {
        /// Threshold percentage (50, 75 or 90).
        percent: u8,
        /// Time since the process started.
        elapsed: Duration,
        /// Time left until the timeout.
        remaining: Duration,
        /// Coarse resource usage, when obtainable.
        resources: Option<ResourceUsage>,
    },
    /// The overall timeout elapsed. The monitor stops after sending this.
    TimedOut {
        /// Time since the process started.
        elapsed: Duration,
    },
}

impl HeartbeatEvent {
    /// Whether this event requires the process to be terminated.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HeartbeatEvent::Dead { .. } | HeartbeatEvent::TimedOut { .. }
        )
    }
}

/// Shared record of the last time a process showed signs of life.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    last_activity: Arc<Mutex<Instant>>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    /// Creates a tracker whose last activity is now.
    pub fn new() -> Self {
        Self {
            last_activity: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Records activity, resetting the idle time.
    pub async fn pulse(&self) {
        let mut last = self.last_activity.lock().await;
        *last = Instant::now();
    }

    /// Time since the last recorded activity.
    pub async fn idle(&self) -> Duration {
        let last = self.last_activity.lock().await;
        last.elapsed()
    }

    /// Timestamp of the last recorded activity.
    pub async fn last_activity(&self) -> Instant {
        *self.last_activity.lock().await
    }
}

/// Liveness and timeout monitor for one supervised process.
///
/// # Example
///
/// ```ignore
/// use testgen::timeout::{ActivityTracker, HeartbeatMonitor, TimeoutConfig};
///
/// let tracker = ActivityTracker::new();
/// let (monitor, mut events) = HeartbeatMonitor::new(TimeoutConfig::default(), tracker.clone(), Some(pid));
/// monitor.start_monitoring();
///
/// // Reader tasks call tracker.pulse().await on every chunk of output.
///
/// while let Some(event) = events.recv().await {
///     if event.is_terminal() {
///         // escalate termination
///         break;
///     }
/// }
/// monitor.stop().await;
/// ```
pub struct HeartbeatMonitor {
    /// Configuration for timeout behavior.
    config: TimeoutConfig,
    /// Activity source for the monitored process.
    tracker: ActivityTracker,
    /// Process id used to sample resource usage.
    pid: Option<u32>,
    /// Channel sender for heartbeat events.
    sender: mpsc::Sender<HeartbeatEvent>,
    /// Flag to signal the background task to stop.
    stop_flag: Arc<AtomicBool>,
    /// Handle to the background monitoring task.
    task_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    /// Creates a new monitor.
    ///
    /// Returns the monitor and the receiver on which its events arrive.
    pub fn new(
        config: TimeoutConfig,
        tracker: ActivityTracker,
        pid: Option<u32>,
    ) -> (Self, mpsc::Receiver<HeartbeatEvent>) {
        let (sender, receiver) = mpsc::channel(16);

        let monitor = Self {
            config,
            tracker,
            pid,
            sender,
            stop_flag: Arc::new(AtomicBool::new(false)),
            task_handle: std::sync::Mutex::new(None),
        };

        (monitor, receiver)
    }

    /// Starts the background monitoring task.
    ///
    /// Progress thresholds are measured from the moment this is called.
    /// Each of the 50/75/90% warnings fires at most once. After a `Dead` or
    /// `TimedOut` event the task ends on its own.
    pub fn start_monitoring(&self) {
        self.stop_flag.store(false, Ordering::SeqCst);

        let config = self.config.clone();
        let tracker = self.tracker.clone();
        let sender = self.sender.clone();
        let stop_flag = Arc::clone(&self.stop_flag);
        let pid = self.pid;

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let interval = config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
            let deadline = started + config.task_timeout;
            let mut next_check = started + interval;
            let mut fired: BTreeSet<u8> = BTreeSet::new();

            loop {
                let next_progress = PROGRESS_THRESHOLDS
                    .iter()
                    .find(|percent| !fired.contains(percent))
                    .map(|percent| started + config.progress_point(*percent))
                    .unwrap_or(deadline);
                let wake_at = next_check.min(next_progress).min(deadline);

                tokio::time::sleep_until(wake_at).await;

                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                let now = Instant::now();
                let elapsed = now.duration_since(started);

                for percent in PROGRESS_THRESHOLDS {
                    if fired.contains(&percent) || elapsed < config.progress_point(percent) {
                        continue;
                    }
                    fired.insert(percent);
                    let event = HeartbeatEvent::TimeoutWarning {
                        percent,
                        elapsed,
                        remaining: config.task_timeout.saturating_sub(elapsed),
                        resources: pid.and_then(resources::sample),
                    };
                    if sender.send(event).await.is_err() {
                        return;
                    }
                }

                if now >= deadline {
                    let _ = sender.send(HeartbeatEvent::TimedOut { elapsed }).await;
                    break;
                }

                if now >= next_check {
                    while next_check <= now {
                        next_check += interval;
                    }

                    let idle = tracker.idle().await;
                    if idle > config.dead_threshold {
                        let _ = sender
                            .send(HeartbeatEvent::Dead {
                                idle,
                                threshold: config.dead_threshold,
                            })
                            .await;
                        break;
                    } else if idle > interval && sender.send(HeartbeatEvent::Slow { idle }).await.is_err() {
                        break;
                    }
                }
            }
        });

        if let Ok(mut task) = self.task_handle.lock() {
            if let Some(previous) = task.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stops the background task and waits for it to finish.
    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);

        let handle = match self.task_handle.lock() {
            Ok(mut task) => task.take(),
            Err(_) => None,
        };

        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Returns a reference to the timeout configuration.
    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Returns true if the monitoring task is currently running.
    pub fn is_running(&self) -> bool {
        match self.task_handle.lock() {
            Ok(task) => task.as_ref().map(|h| !h.is_finished()).unwrap_or(false),
            Err(_) => false,
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Ok(mut task) = self.task_handle.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}
