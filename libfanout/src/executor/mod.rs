use std::time::Duration;

use async_trait::async_trait;
use derive_getters::Getters;
use serde::Serialize;

use crate::plan::host::Target;

pub mod aggregator;
pub mod fleet;
pub mod ssh;
#[cfg(test)]
pub(crate) mod testing;
pub mod worker;

pub use aggregator::{ResultSink, ResultSource};
pub use fleet::{Fleet, Scheduling};
pub use worker::Worker;

/// Everything that can go wrong between dialing a host and capturing a
/// command's output. Inside a worker these never propagate; they're recorded
/// as [`Outcome::Failure`] with their display text.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("timed out connecting to {address} after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },
    #[error("authentication rejected for {user}@{address}")]
    AuthenticationRejected { user: String, address: String },
    #[error("failed to open session channel: {0}")]
    Channel(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),
    #[error("command exited with status {status}")]
    NonZeroExit { status: u32, output: String },
    #[error("command terminated by signal {signal}")]
    Signal { signal: String, output: String },
}

impl ExecError {
    /// The failure reason as it appears in the report. Output captured
    /// before a non-zero exit or a signal is kept after the reason.
    pub fn reason(&self) -> String {
        match self {
            ExecError::NonZeroExit { output, .. } | ExecError::Signal { output, .. }
                if !output.is_empty() =>
            {
                format!("{}\n{}", self, output)
            }
            _ => self.to_string(),
        }
    }
}

/// Shared login material for a run. Obtained once and shared read-only by
/// every worker.
#[derive(Getters, Clone)]
pub struct Credentials {
    user: String,
    #[getter(skip)]
    password: String,
}

impl Credentials {
    pub fn new<S: Into<String>>(user: S, password: S) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Dials targets. This is the seam between the fan-out engine and the
/// transport; [`ssh::SshSessionClient`] is the real implementation.
#[async_trait]
pub trait SessionClient: std::fmt::Debug + Send + Sync {
    async fn connect(
        &self,
        target: &Target,
        credentials: &Credentials,
    ) -> Result<Box<dyn Session>, ExecError>;
}

/// An established connection to one target. Each [`Session::run`] uses a
/// fresh execution channel.
#[async_trait]
pub trait Session: Send {
    /// Run one command and return its combined stdout and stderr.
    async fn run(&mut self, command: &str) -> Result<String, ExecError>;

    async fn close(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "text", rename_all = "lowercase")]
pub enum Outcome {
    Output(String),
    Failure(String),
}

impl Outcome {
    pub fn text(&self) -> &str {
        match self {
            Outcome::Output(text) | Outcome::Failure(text) => text,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}

impl From<Result<String, ExecError>> for Outcome {
    fn from(result: Result<String, ExecError>) -> Self {
        match result {
            Ok(output) => Outcome::Output(output),
            Err(e) => Outcome::Failure(e.reason()),
        }
    }
}

/// The outcome of running one command on one target.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    #[serde(skip)]
    target_index: usize,
    #[serde(rename = "target")]
    target_address: String,
    #[serde(skip)]
    command_index: usize,
    command: String,
    #[serde(flatten)]
    outcome: Outcome,
}

impl CommandResult {
    pub fn new<S: Into<String>>(
        target: &Target,
        command_index: usize,
        command: S,
        outcome: Outcome,
    ) -> Self {
        Self {
            target_index: *target.index(),
            target_address: target.address().clone(),
            command_index,
            command: command.into(),
            outcome,
        }
    }

    /// Position of this result in the report.
    pub fn key(&self) -> (usize, usize) {
        (self.target_index, self.command_index)
    }
}
