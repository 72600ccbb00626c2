//! One live supervised process and everything attached to it.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::timeout::{ActivityTracker, HeartbeatEvent, HeartbeatMonitor, TimeoutConfig};

use super::classifier::{FatalKind, LineClassifier};
use super::control::{escalate_termination, Termination};
use super::registry::{ProcessRegistry, Registration};

/// Upper bound on captured bytes per stream. Further output is counted and
/// drained but not kept.
const MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

/// How long to wait for reader tasks after the process is gone.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why supervision of a process ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// The process exited on its own. `None` when killed by a signal.
    Exited(Option<i32>),
    /// Waiting on the process failed.
    WaitFailed(String),
    /// The classifier found an unrecoverable condition in the output.
    Fatal(FatalKind, String),
    /// No output for longer than the dead threshold.
    Dead { idle: Duration },
    /// The overall timeout elapsed.
    TimedOut { elapsed: Duration },
    /// The run was cancelled.
    Cancelled,
}

impl Settlement {
    /// Whether the process may still be running and needs terminating.
    pub fn needs_termination(&self) -> bool {
        !matches!(self, Settlement::Exited(_) | Settlement::WaitFailed(_))
    }
}

/// Output collected from a finished process.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    /// A fatal verdict that arrived after the process settled.
    pub late_fatal: Option<(FatalKind, String)>,
}

/// A spawned process together with its liveness monitor, stream readers
/// and registry entry. Exclusively owned by the worker that spawned it.
pub struct ProcessHandle {
    task_id: String,
    child: Child,
    pid: Option<u32>,
    started_at: Instant,
    tracker: ActivityTracker,
    monitor: HeartbeatMonitor,
    heartbeat: mpsc::Receiver<HeartbeatEvent>,
    verdicts: mpsc::UnboundedReceiver<(FatalKind, String)>,
    stdout_task: Option<JoinHandle<Vec<u8>>>,
    stderr_task: Option<JoinHandle<Vec<u8>>>,
    stdout_bytes: Arc<AtomicU64>,
    stderr_bytes: Arc<AtomicU64>,
    _registration: Registration,
}

impl ProcessHandle {
    /// Spawns `command` and starts supervising it.
    ///
    /// Stdout and stderr are piped. Stderr is classified as it arrives;
    /// stdout carries generated content and is only accounted.
    pub fn spawn(
        task_id: &str,
        mut command: Command,
        timeouts: TimeoutConfig,
        registry: &ProcessRegistry,
    ) -> std::io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let pid = child.id();
        let tracker = ActivityTracker::new();
        let stdout_bytes = Arc::new(AtomicU64::new(0));
        let stderr_bytes = Arc::new(AtomicU64::new(0));
        let (verdict_tx, verdicts) = mpsc::unbounded_channel();

        let stdout_task = child.stdout.take().map(|stdout| {
            tokio::spawn(pump(stdout, tracker.clone(), stdout_bytes.clone(), None))
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(pump(
                stderr,
                tracker.clone(),
                stderr_bytes.clone(),
                Some(verdict_tx),
            ))
        });

        let (monitor, heartbeat) = HeartbeatMonitor::new(timeouts, tracker.clone(), pid);
        monitor.start_monitoring();

        Ok(Self {
            task_id: task_id.to_string(),
            child,
            pid,
            started_at: Instant::now(),
            tracker,
            monitor,
            heartbeat,
            verdicts,
            stdout_task,
            stderr_task,
            stdout_bytes,
            stderr_bytes,
            _registration: registry.register(task_id, pid),
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub async fn idle(&self) -> Duration {
        self.tracker.idle().await
    }

    /// Bytes seen so far on (stdout, stderr).
    pub fn bytes_seen(&self) -> (u64, u64) {
        (
            self.stdout_bytes.load(Ordering::Relaxed),
            self.stderr_bytes.load(Ordering::Relaxed),
        )
    }

    /// Waits for the first terminal condition. Non-terminal heartbeat
    /// events are passed to `on_event` as they arrive.
    pub async fn settle<F>(&mut self, cancel: &mut watch::Receiver<bool>, mut on_event: F) -> Settlement
    where
        F: FnMut(&HeartbeatEvent),
    {
        loop {
            tokio::select! {
                status = self.child.wait() => {
                    return match status {
                        Ok(status) => Settlement::Exited(status.code()),
                        Err(err) => Settlement::WaitFailed(err.to_string()),
                    };
                }
                Some((kind, line)) = self.verdicts.recv() => {
                    return Settlement::Fatal(kind, line);
                }
                Some(event) = self.heartbeat.recv() => {
                    on_event(&event);
                    match event {
                        HeartbeatEvent::Dead { idle, .. } => return Settlement::Dead { idle },
                        HeartbeatEvent::TimedOut { elapsed } => return Settlement::TimedOut { elapsed },
                        _ => {}
                    }
                }
                _ = cancelled(cancel) => {
                    return Settlement::Cancelled;
                }
            }
        }
    }

    /// Terminates the process: graceful signal first, kill after `grace`.
    pub async fn terminate(&mut self, grace: Duration) -> Termination {
        let termination = escalate_termination(&mut self.child, grace).await;
        debug!(task_id = %self.task_id, pid = ?self.pid, ?termination, "process terminated");
        termination
    }

    /// Stops monitoring and collects the captured output. Consumes the
    /// handle, which removes it from the registry.
    pub async fn finish(mut self) -> CapturedOutput {
        self.monitor.stop().await;

        let stdout = join_reader(&self.task_id, "stdout", self.stdout_task.take()).await;
        let stderr = join_reader(&self.task_id, "stderr", self.stderr_task.take()).await;

        CapturedOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            stdout_bytes: self.stdout_bytes.load(Ordering::Relaxed),
            stderr_bytes: self.stderr_bytes.load(Ordering::Relaxed),
            late_fatal: self.verdicts.try_recv().ok(),
        }
    }
}

/// Resolves once cancellation is requested. Never resolves if the sender
/// is gone without having requested it.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Reads a stream to the end, recording activity and byte counts, and
/// optionally classifying it.
async fn pump<R>(
    mut reader: R,
    tracker: ActivityTracker,
    bytes: Arc<AtomicU64>,
    verdicts: Option<mpsc::UnboundedSender<(FatalKind, String)>>,
) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    let mut classifier = LineClassifier::new();
    let mut reported = false;

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                debug!(error = %err, "stream read failed");
                break;
            }
        };

        tracker.pulse().await;
        bytes.fetch_add(n as u64, Ordering::Relaxed);

        let remaining = MAX_OUTPUT_BYTES.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..n.min(remaining)]);

        if let (Some(sender), false) = (&verdicts, reported) {
            let (fatal, warning) = classifier.feed(&String::from_utf8_lossy(&chunk[..n]));
            if warning {
                debug!("tool reported a transient condition");
            }
            if let Some(verdict) = fatal {
                reported = true;
                let _ = sender.send(verdict);
            }
        }
    }

    buf
}

async fn join_reader(task_id: &str, stream: &str, task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(mut task) = task else {
        return Vec::new();
    };
    match tokio::time::timeout(IO_CAPTURE_TIMEOUT, &mut task).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(err)) => {
            warn!(task_id, stream, error = %err, "reader task failed");
            Vec::new()
        }
        Err(_) => {
            warn!(task_id, stream, "output capture timed out");
            task.abort();
            Vec::new()
        }
    }
}
