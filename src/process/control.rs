//! Termination escalation for supervised processes.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::{debug, warn};

/// Signals a supervised process can receive.
#[async_trait]
pub trait ProcessControl: Send {
    /// Asks the process to exit (SIGTERM on unix).
    fn terminate(&mut self) -> io::Result<()>;

    /// Forces the process to exit (SIGKILL on unix).
    fn kill(&mut self) -> io::Result<()>;

    /// Waits until the process has exited.
    async fn wait_exit(&mut self) -> io::Result<()>;

    /// Whether the process has already exited.
    fn has_exited(&mut self) -> bool;
}

/// How a termination escalation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process was gone before any signal was sent.
    AlreadyExited,
    /// The process exited within the grace period after the terminate signal.
    Graceful,
    /// The process had to be force-killed.
    Killed,
}

/// Sends terminate, waits up to `grace`, then force-kills.
pub async fn escalate_termination<P>(process: &mut P, grace: Duration) -> Termination
where
    P: ProcessControl + ?Sized,
{
    if process.has_exited() {
        return Termination::AlreadyExited;
    }

    if let Err(err) = process.terminate() {
        debug!(error = %err, "terminate signal failed");
    }

    match tokio::time::timeout(grace, process.wait_exit()).await {
        Ok(Ok(())) => Termination::Graceful,
        Ok(Err(err)) => {
            warn!(error = %err, "waiting for terminated process failed");
            Termination::Graceful
        }
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "process ignored terminate signal, killing");
            if let Err(err) = process.kill() {
                warn!(error = %err, "failed to kill process");
            }
            let _ = process.wait_exit().await;
            Termination::Killed
        }
    }
}

/// Child processes are spawned as leaders of their own process group, so
/// signals go to the whole group and reach anything the tool forked.
#[async_trait]
impl ProcessControl for Child {
    fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            signal_group(self.id(), nix::sys::signal::Signal::SIGTERM)
        }
        #[cfg(not(unix))]
        {
            self.start_kill()
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            let _ = signal_group(self.id(), nix::sys::signal::Signal::SIGKILL);
        }
        match self.start_kill() {
            Ok(()) => Ok(()),
            // Already reaped
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn wait_exit(&mut self) -> io::Result<()> {
        self.wait().await.map(|_| ())
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.try_wait(), Ok(Some(_)))
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return Ok(());
    };
    let pid = Pid::from_raw(pid as i32);
    killpg(pid, signal)
        .or_else(|_| kill(pid, signal))
        .map_err(|errno| io::Error::from_raw_os_error(errno as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Signal {
        Term,
        Kill,
    }

    /// Fake process that records signals and exits on the one it honours.
    struct FakeProcess {
        signals: Vec<Signal>,
        honours_term: bool,
        exited: bool,
    }

    impl FakeProcess {
        fn new(honours_term: bool) -> Self {
            Self {
                signals: Vec::new(),
                honours_term,
                exited: false,
            }
        }
    }

    #[async_trait]
    impl ProcessControl for FakeProcess {
        fn terminate(&mut self) -> io::Result<()> {
            self.signals.push(Signal::Term);
            if self.honours_term {
                self.exited = true;
            }
            Ok(())
        }

        fn kill(&mut self) -> io::Result<()> {
            self.signals.push(Signal::Kill);
            self.exited = true;
            Ok(())
        }

        async fn wait_exit(&mut self) -> io::Result<()> {
            if self.exited {
                Ok(())
            } else {
                std::future::pending().await
            }
        }

        fn has_exited(&mut self) -> bool {
            self.exited
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_exit_skips_kill() {
        let mut process = FakeProcess::new(true);
        let outcome = escalate_termination(&mut process, Duration::from_secs(5)).await;
        assert_eq!(outcome, Termination::Graceful);
        assert_eq!(process.signals, vec![Signal::Term]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_then_kill_in_order() {
        let mut process = FakeProcess::new(false);
        let started = tokio::time::Instant::now();
        let outcome = escalate_termination(&mut process, Duration::from_secs(5)).await;
        assert_eq!(outcome, Termination::Killed);
        assert_eq!(process.signals, vec![Signal::Term, Signal::Kill]);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_exited_sends_nothing() {
        let mut process = FakeProcess::new(true);
        process.exited = true;
        let outcome = escalate_termination(&mut process, Duration::from_secs(5)).await;
        assert_eq!(outcome, Termination::AlreadyExited);
        assert!(process.signals.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_child_is_terminated() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let outcome = escalate_termination(&mut child, Duration::from_secs(5)).await;
        assert_eq!(outcome, Termination::Graceful);
        assert!(child.has_exited());
    }
}
