//! Pre-flight check of whether the external tool is usable.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use crate::config::OrchestratorConfig;

use super::classifier::{classify, FatalKind, Verdict};

/// Result of an authentication probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub authenticated: bool,
    /// Placeholder output may stand in for the tool.
    pub can_degrade: bool,
    pub message: String,
}

impl AuthStatus {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            can_degrade: false,
            message: message.into(),
        }
    }

    pub fn unavailable(can_degrade: bool, message: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            can_degrade,
            message: message.into(),
        }
    }

    /// Whether a batch should run in degraded mode.
    pub fn should_degrade(&self) -> bool {
        !self.authenticated && self.can_degrade
    }
}

#[async_trait]
pub trait AuthProbe: Send + Sync {
    async fn probe(&self) -> AuthStatus;
}

/// Probe that invokes the tool with cheap arguments and classifies what it
/// prints.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    command: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    can_degrade: bool,
}

impl CommandProbe {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: vec!["--version".to_string()],
            timeout: Duration::from_secs(15),
            can_degrade: false,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.command.clone()).with_can_degrade(config.graceful_degradation)
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_can_degrade(mut self, can_degrade: bool) -> Self {
        self.can_degrade = can_degrade;
        self
    }
}

#[async_trait]
impl AuthProbe for CommandProbe {
    async fn probe(&self) -> AuthStatus {
        let output = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return AuthStatus::unavailable(
                    self.can_degrade,
                    format!("'{}' not found", self.command.display()),
                );
            }
            Ok(Err(err)) => return AuthStatus::unavailable(self.can_degrade, err.to_string()),
            Err(_) => {
                return AuthStatus::unavailable(
                    self.can_degrade,
                    format!("probe timed out after {:?}", self.timeout),
                )
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let auth_failure = stderr
            .lines()
            .chain(stdout.lines())
            .map(str::trim)
            .find(|line| classify(line) == Verdict::Fatal(FatalKind::Authentication));

        if let Some(line) = auth_failure {
            return AuthStatus::unavailable(self.can_degrade, line);
        }
        if !output.status.success() {
            let detail = stderr.trim();
            return AuthStatus::unavailable(
                self.can_degrade,
                if detail.is_empty() {
                    format!("probe exited with {}", output.status)
                } else {
                    detail.to_string()
                },
            );
        }
        AuthStatus::ok(stdout.trim())
    }
}
