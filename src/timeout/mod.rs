//! Timeout configuration and liveness monitoring.
//!
//! This module provides the per-task timeout settings and the heartbeat
//! monitor that watches a supervised process for silence (slow/dead) and
//! for progress against its overall timeout.

pub mod heartbeat;
pub mod resources;

use std::time::Duration;

// Re-export heartbeat types for convenient access
pub use heartbeat::{ActivityTracker, HeartbeatEvent, HeartbeatMonitor};
pub use resources::ResourceUsage;

/// Percentages of the task timeout at which a progress warning fires.
pub const PROGRESS_THRESHOLDS: [u8; 3] = [50, 75, 90];

/// Shortest liveness check period the monitor will use.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for timeout behavior of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum time a single process may run.
    /// Default: 600 seconds (10 minutes)
    pub task_timeout: Duration,

    /// Interval between liveness checks. Silence longer than this is
    /// reported as a slow process.
    /// Default: 30 seconds
    pub heartbeat_interval: Duration,

    /// Silence after which the process is considered dead and terminated.
    /// Default: 120 seconds
    pub dead_threshold: Duration,

    /// Time to wait after the graceful terminate signal before force-killing.
    /// Default: 5 seconds
    pub kill_grace: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(600),
            heartbeat_interval: Duration::from_secs(30),
            dead_threshold: Duration::from_secs(120),
            kill_grace: Duration::from_secs(5),
        }
    }
}

impl TimeoutConfig {
    /// Creates a new TimeoutConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the overall task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the silence threshold after which a process is dead.
    pub fn with_dead_threshold(mut self, threshold: Duration) -> Self {
        self.dead_threshold = threshold;
        self
    }

    /// Sets the grace period between terminate and kill.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Time from start at which the given progress percentage is reached.
    pub fn progress_point(&self, percent: u8) -> Duration {
        self.task_timeout.mul_f64(f64::from(percent) / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_task_timeout() {
        let config = TimeoutConfig::default();
        assert_eq!(config.task_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_default_heartbeat_interval() {
        let config = TimeoutConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_default_dead_threshold() {
        let config = TimeoutConfig::default();
        assert_eq!(config.dead_threshold, Duration::from_secs(120));
    }

    #[test]
    fn test_default_kill_grace() {
        let config = TimeoutConfig::default();
        assert_eq!(config.kill_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_new_returns_default() {
        assert_eq!(TimeoutConfig::new(), TimeoutConfig::default());
    }

    #[test]
    fn test_builder_pattern() {
        let config = TimeoutConfig::new()
            .with_task_timeout(Duration::from_secs(300))
            .with_heartbeat_interval(Duration::from_secs(15))
            .with_dead_threshold(Duration::from_secs(60))
            .with_kill_grace(Duration::from_secs(1));

        assert_eq!(config.task_timeout, Duration::from_secs(300));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.dead_threshold, Duration::from_secs(60));
        assert_eq!(config.kill_grace, Duration::from_secs(1));
    }

    #[test]
    fn test_progress_points() {
        let config = TimeoutConfig::new().with_task_timeout(Duration::from_secs(200));
        assert_eq!(config.progress_point(50), Duration::from_secs(100));
        assert_eq!(config.progress_point(75), Duration::from_secs(150));
        assert_eq!(config.progress_point(90), Duration::from_secs(180));
        assert_eq!(config.progress_point(100), Duration::from_secs(200));
    }
}
