//! Container runtime abstraction.
//!
//! The lifecycle manager only ever talks to a [`RuntimeClient`]; the
//! concrete implementation shipped here drives the Docker CLI.

pub mod docker;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use deskpool_common::types::RuntimeId;
use thiserror::Error;

pub use docker::DockerCliClient;

/// Restart policy applied by the runtime to a desktop container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart automatically.
    No,
    /// Restart after a non-zero exit, at most `max_retries` times.
    OnFailure {
        /// Upper bound on automatic restarts.
        max_retries: u32,
    },
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::No => f.write_str("no"),
            Self::OnFailure { max_retries } => write!(f, "on-failure:{max_retries}"),
        }
    }
}

/// Everything the runtime needs to create a desktop instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    /// Image reference.
    pub image: String,
    /// Network the instance is attached to.
    pub network: String,
    /// Protocol port inside the container.
    pub internal_port: u16,
    /// Host port bound to `internal_port`.
    pub host_port: u16,
    /// Automatic restart policy.
    pub restart_policy: RestartPolicy,
}

/// Observed state of a runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceState {
    /// Whether the instance is currently running.
    pub running: bool,
}

/// Errors reported by a [`RuntimeClient`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime does not know the instance.
    #[error("no such container: {runtime_id}")]
    NotFound {
        /// Identifier the runtime did not recognise.
        runtime_id: String,
    },

    /// The runtime command ran but failed.
    #[error("'{command}' failed{}: {stderr}", exit_suffix(.exit_code.as_ref().copied()))]
    CommandFailed {
        /// Command that failed.
        command: String,
        /// Trimmed standard error output.
        stderr: String,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
    },

    /// The runtime binary could not be executed.
    #[error("failed to execute '{command}': {source}")]
    ExecFailed {
        /// Command that could not be spawned.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The runtime answered with output that could not be interpreted.
    #[error("unexpected output from '{command}': {output:?}")]
    MalformedOutput {
        /// Command whose output was rejected.
        command: String,
        /// The offending output.
        output: String,
    },

    /// The call did not complete before its deadline.
    #[error("runtime {operation} timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Name of the runtime operation.
        operation: &'static str,
        /// Deadline that expired.
        timeout: Duration,
    },
}

impl RuntimeError {
    /// Returns whether the runtime reported the instance as unknown.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn exit_suffix(exit_code: Option<i32>) -> String {
    exit_code.map_or_else(String::new, |code| format!(" (exit code {code})"))
}

/// Container runtime operations consumed by the lifecycle manager.
///
/// Implementors must report an unknown instance as
/// [`RuntimeError::NotFound`] so callers can apply idempotent semantics.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Creates (but does not start) an instance, returning its runtime ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime rejects the request.
    async fn create(&self, spec: &InstanceSpec) -> Result<RuntimeId, RuntimeError>;

    /// Starts a created instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance cannot be started.
    async fn start(&self, id: &RuntimeId) -> Result<(), RuntimeError>;

    /// Stops a running instance.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if the instance is unknown.
    async fn stop(&self, id: &RuntimeId) -> Result<(), RuntimeError>;

    /// Reports whether the instance is running.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if the instance is unknown.
    async fn inspect(&self, id: &RuntimeId) -> Result<InstanceState, RuntimeError>;

    /// Removes the instance, killing it first when `force` is set.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if the instance is unknown.
    async fn remove(&self, id: &RuntimeId, force: bool) -> Result<(), RuntimeError>;
}
