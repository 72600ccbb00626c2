//! Orchestrator configuration.
//!
//! Configuration is read from an optional TOML file and then overlaid with
//! `TESTGEN_*` environment variables. Every field has a default, so an empty
//! source produces a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::error::ErrorKind;
use crate::resilience::RetryOptions;
use crate::timeout::TimeoutConfig;

/// Model used when the configured one is unusable.
pub const DEFAULT_MODEL: &str = "sonnet";

/// Default fallback model passed to the external tool.
pub const DEFAULT_FALLBACK_MODEL: &str = "haiku";

/// Default external tool binary.
pub const DEFAULT_COMMAND: &str = "claude";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "TESTGEN";

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Output encoding requested from the external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

impl OutputFormat {
    /// Value passed to the tool's `--output-format` flag.
    pub fn as_arg(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "text" => Ok(OutputFormat::Text),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// Configuration for the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// External code-generation binary.
    pub command: PathBuf,
    /// Extra arguments appended to every invocation.
    pub extra_args: Vec<String>,
    /// Model id passed to the tool.
    pub model: String,
    /// Fallback model id passed to the tool.
    pub fallback_model: String,
    /// Upper bound on concurrently supervised processes.
    pub max_concurrent: usize,
    /// Maximum attempts per task (including the first).
    pub retry_attempts: u32,
    /// Initial retry delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Cap on the retry delay in milliseconds.
    pub max_retry_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
    /// Whether retry delays are randomised.
    pub jitter: bool,
    /// Exponential backoff between retries; constant delay when false.
    pub exponential_backoff: bool,
    /// Overall per-task process timeout in milliseconds.
    pub timeout_ms: u64,
    /// Output encoding requested from the tool.
    pub output_format: OutputFormat,
    /// Verbose logging of tool output.
    pub verbose: bool,
    /// Substitute placeholder output when the tool cannot authenticate.
    pub graceful_degradation: bool,
    /// Whether calls go through the circuit breaker.
    pub circuit_breaker: bool,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe call, in milliseconds.
    pub recovery_timeout_ms: u64,
    /// Interval between liveness checks in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a process is considered dead, in milliseconds.
    pub dead_threshold_ms: u64,
    /// Time between the graceful terminate and the force kill, in milliseconds.
    pub kill_grace_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from(DEFAULT_COMMAND),
            extra_args: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            max_concurrent: 3,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: true,
            exponential_backoff: true,
            timeout_ms: 600_000,
            output_format: OutputFormat::Json,
            verbose: false,
            graceful_degradation: false,
            circuit_breaker: true,
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            heartbeat_interval_ms: 30_000,
            dead_threshold_ms: 120_000,
            kill_grace_ms: 5_000,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from an optional TOML file plus `TESTGEN_*`
    /// environment variables, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("extra_args"),
        );

        let loaded: OrchestratorConfig = builder.build()?.try_deserialize()?;
        loaded.validate()
    }

    /// Checks invariants and repairs a bad model id.
    ///
    /// An unusable model is not fatal for the run: it is replaced by
    /// [`DEFAULT_MODEL`] with a warning.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.dead_threshold_ms < self.heartbeat_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "dead_threshold_ms ({}) must not be below heartbeat_interval_ms ({})",
                self.dead_threshold_ms, self.heartbeat_interval_ms
            )));
        }
        if self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff_factor must be at least 1.0".to_string(),
            ));
        }

        if !is_valid_model_id(&self.model) {
            warn!(
                model = %self.model,
                fallback = DEFAULT_MODEL,
                "invalid model configuration, falling back to default model"
            );
            self.model = DEFAULT_MODEL.to_string();
        }
        if !is_valid_model_id(&self.fallback_model) {
            warn!(
                model = %self.fallback_model,
                fallback = DEFAULT_FALLBACK_MODEL,
                "invalid fallback model configuration, using default fallback"
            );
            self.fallback_model = DEFAULT_FALLBACK_MODEL.to_string();
        }

        Ok(self)
    }

    /// Timeout and liveness settings derived from this configuration.
    pub fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig::new()
            .with_task_timeout(Duration::from_millis(self.timeout_ms))
            .with_heartbeat_interval(Duration::from_millis(self.heartbeat_interval_ms))
            .with_dead_threshold(Duration::from_millis(self.dead_threshold_ms))
            .with_kill_grace(Duration::from_millis(self.kill_grace_ms))
    }

    /// Retry policy for task attempts.
    ///
    /// Rate-limit responses that were not caught by the live classifier are
    /// retried alongside network errors and timeouts.
    pub fn retry_options(&self) -> RetryOptions {
        let factor = if self.exponential_backoff {
            self.backoff_factor
        } else {
            1.0
        };
        RetryOptions::new()
            .with_max_attempts(self.retry_attempts)
            .with_initial_delay(Duration::from_millis(self.retry_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_retry_delay_ms))
            .with_backoff_factor(factor)
            .with_jitter(self.jitter)
            .with_retryable_kinds([ErrorKind::Network, ErrorKind::Timeout, ErrorKind::RateLimit])
    }

    /// Sets the external tool binary.
    pub fn with_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.command = command.into();
        self
    }

    /// Sets the model id.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the maximum number of concurrent processes.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Sets the maximum attempts per task.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets the initial retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Enables or disables retry jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the per-task timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the output encoding.
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Enables or disables graceful degradation.
    pub fn with_graceful_degradation(mut self, enabled: bool) -> Self {
        self.graceful_degradation = enabled;
        self
    }

    /// Enables or disables the circuit breaker.
    pub fn with_circuit_breaker(mut self, enabled: bool) -> Self {
        self.circuit_breaker = enabled;
        self
    }

    /// Sets the heartbeat interval and dead threshold together.
    pub fn with_liveness(mut self, heartbeat: Duration, dead_threshold: Duration) -> Self {
        self.heartbeat_interval_ms = heartbeat.as_millis() as u64;
        self.dead_threshold_ms = dead_threshold.as_millis() as u64;
        self
    }

    /// Sets the grace period between terminate and kill.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace_ms = grace.as_millis() as u64;
        self
    }
}

fn is_valid_model_id(model: &str) -> bool {
    // Model ids are passed as a single argv entry; reject anything that looks
    // like shell syntax or whitespace-separated words.
    let pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:/\[\]-]*$");
    match pattern {
        Ok(re) => re.is_match(model),
        Err(_) => !model.trim().is_empty(),
    }
}
