//! External process invocation
//!
//! Everything the pipeline needs from external tools goes through
//! [`CommandRunner`], so tests can substitute canned outputs for real
//! `skopeo` and builder processes.

use crate::error::{BuildError, Result};
use async_trait::async_trait;
use flatpub_config::RetrySettings;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Diagnostic text of the run, stdout followed by stderr
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Stdout of a successful run, or [`BuildError::ToolFailed`]
    pub fn into_stdout(self, program: &str, args: &[String]) -> Result<String> {
        if self.is_success() {
            return Ok(self.stdout);
        }
        let status = match self.code {
            Some(code) => format!("exit code {}", code),
            None => "termination by signal".to_string(),
        };
        Err(BuildError::ToolFailed {
            command: command_line(program, args),
            status,
            output: self.combined_output(),
        })
    }
}

pub fn command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion and capture its output.
    ///
    /// A non-zero exit is reported through [`CommandOutput::code`]; only a
    /// failure to spawn the process is an `Err`.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {}", command_line(program, args));

        let output = cmd.output().await?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Retry configuration for external tool invocations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for the delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Retries commands that exit non-zero, with exponential backoff.
///
/// Spawn errors are returned immediately.
pub struct RetryingRunner<R> {
    inner: R,
    config: RetryConfig,
}

impl<R: CommandRunner> RetryingRunner<R> {
    pub fn new(inner: R, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<R: CommandRunner> CommandRunner for RetryingRunner<R> {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let mut attempt = 1;
        loop {
            let output = self.inner.run(program, args).await?;
            if output.is_success() || attempt >= self.config.max_attempts {
                return Ok(output);
            }

            let delay = self.config.delay_for(attempt - 1);
            tracing::warn!(
                "{} failed (attempt {}/{}), retrying in {:?}",
                command_line(program, args),
                attempt,
                self.config.max_attempts,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
