//! Docker CLI implementation of [`RuntimeClient`].
//!
//! Every call spawns the `docker` binary through `tokio::process`. The
//! child is killed when its future is dropped, so a deadline imposed by
//! the caller also aborts the underlying command.

use std::process::Output;

use async_trait::async_trait;
use deskpool_common::types::RuntimeId;

use super::{InstanceSpec, InstanceState, RuntimeClient, RuntimeError};

/// Stderr fragments the Docker CLI prints for an unknown container.
const NOT_FOUND_MARKERS: [&str; 2] = ["No such container", "No such object"];

/// Runtime client driving the Docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCliClient {
    binary: String,
    host: Option<String>,
}

impl DockerCliClient {
    /// Creates a client using `docker` from `PATH` and its default endpoint.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            host: None,
        }
    }

    /// Targets a specific daemon endpoint (passed as `--host`).
    #[must_use]
    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host = host.filter(|h| !h.trim().is_empty());
        self
    }

    /// Uses a different CLI binary, e.g. `podman`.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn full_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(host) = &self.host {
            full.push("--host");
            full.push(host.as_str());
        }
        full.extend_from_slice(args);
        full
    }

    /// Runs the CLI, returning its output only if it exited successfully.
    async fn run(
        &self,
        args: &[&str],
        runtime_id: Option<&RuntimeId>,
    ) -> Result<Output, RuntimeError> {
        let full = self.full_args(args);
        let command = format!("{} {}", self.binary, args.join(" "));
        tracing::debug!(%command, "invoking container runtime");

        let output = tokio::process::Command::new(&self.binary)
            .args(&full)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RuntimeError::ExecFailed {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_failure(
                command,
                runtime_id,
                &output.stderr,
                output.status.code(),
            ))
        }
    }
}

impl Default for DockerCliClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeClient for DockerCliClient {
    async fn create(&self, spec: &InstanceSpec) -> Result<RuntimeId, RuntimeError> {
        let args = create_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&arg_refs, None).await?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() || id.contains(char::is_whitespace) {
            return Err(RuntimeError::MalformedOutput {
                command: format!("{} create", self.binary),
                output: id,
            });
        }
        Ok(RuntimeId::new(id))
    }

    async fn start(&self, id: &RuntimeId) -> Result<(), RuntimeError> {
        let _ = self.run(&["start", id.as_str()], Some(id)).await?;
        Ok(())
    }

    async fn stop(&self, id: &RuntimeId) -> Result<(), RuntimeError> {
        let _ = self.run(&["stop", id.as_str()], Some(id)).await?;
        Ok(())
    }

    async fn inspect(&self, id: &RuntimeId) -> Result<InstanceState, RuntimeError> {
        let output = self
            .run(
                &["inspect", "--type", "container", "-f", "{{.State.Running}}", id.as_str()],
                Some(id),
            )
            .await?;
        let running = parse_running(&self.binary, &String::from_utf8_lossy(&output.stdout))?;
        Ok(InstanceState { running })
    }

    async fn remove(&self, id: &RuntimeId, force: bool) -> Result<(), RuntimeError> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(id.as_str());
        let _ = self.run(&args, Some(id)).await?;
        Ok(())
    }
}

/// Builds the `create` argument list for a desktop instance.
fn create_args(spec: &InstanceSpec) -> Vec<String> {
    vec![
        "create".to_string(),
        "--tty".to_string(),
        "--publish".to_string(),
        format!("{}:{}/tcp", spec.host_port, spec.internal_port),
        "--network".to_string(),
        spec.network.clone(),
        "--restart".to_string(),
        spec.restart_policy.to_string(),
        spec.image.clone(),
    ]
}

/// Maps a failed invocation to a [`RuntimeError`], recognising unknown
/// containers.
fn classify_failure(
    command: String,
    runtime_id: Option<&RuntimeId>,
    stderr: &[u8],
    exit_code: Option<i32>,
) -> RuntimeError {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    if let Some(id) = runtime_id {
        if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
            return RuntimeError::NotFound {
                runtime_id: id.to_string(),
            };
        }
    }
    RuntimeError::CommandFailed {
        command,
        stderr,
        exit_code,
    }
}

fn parse_running(binary: &str, stdout: &str) -> Result<bool, RuntimeError> {
    match stdout.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(RuntimeError::MalformedOutput {
            command: format!("{binary} inspect"),
            output: other.to_string(),
        }),
    }
}
