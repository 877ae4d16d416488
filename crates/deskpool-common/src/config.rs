//! Configuration model for the lifecycle manager and its collaborators.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{DeskpoolError, Result};
use crate::types::PortRange;

/// Root configuration for deskpool.
///
/// Built once at startup (the CLI fills it from flags and environment
/// variables) and passed explicitly into the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeskpoolConfig {
    /// Datastore connection string (`memory://`, `file:///path` or a path).
    pub database_url: String,
    /// Container runtime endpoint, e.g. `unix:///var/run/docker.sock`.
    /// `None` uses the runtime's own default.
    pub runtime_endpoint: Option<String>,
    /// Network every desktop container is attached to.
    pub network: String,
    /// Image reference of the desktop container.
    pub image: String,
    /// Host ports available to the allocator.
    pub port_range: PortRange,
    /// Protocol port exposed by the image.
    pub internal_port: u16,
    /// Maximum automatic restarts (`on-failure` policy).
    pub restart_max_retries: u32,
    /// Deadline for each runtime and store call.
    #[serde(with = "duration_secs")]
    pub operation_timeout: Duration,
    /// Allocation scans attempted before a port conflict is reported.
    pub allocation_attempts: u32,
    /// Host name used in connection hints.
    pub public_host: String,
}

impl DeskpoolConfig {
    /// Checks the configuration for values the lifecycle manager cannot use.
    ///
    /// # Errors
    ///
    /// Returns [`DeskpoolError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.port_range.start > self.port_range.end {
            return Err(DeskpoolError::config(format!(
                "port range {} is empty",
                self.port_range
            )));
        }
        if self.port_range.start == 0 {
            return Err(DeskpoolError::config("port range must not include port 0"));
        }
        if self.internal_port == 0 {
            return Err(DeskpoolError::config("internal port must be non-zero"));
        }
        if self.operation_timeout.is_zero() {
            return Err(DeskpoolError::config("operation timeout must be non-zero"));
        }
        if self.allocation_attempts == 0 {
            return Err(DeskpoolError::config(
                "allocation attempts must be at least 1",
            ));
        }
        if self.image.trim().is_empty() {
            return Err(DeskpoolError::config("image reference must not be empty"));
        }
        if self.network.trim().is_empty() {
            return Err(DeskpoolError::config("network must not be empty"));
        }
        if self.public_host.trim().is_empty() {
            return Err(DeskpoolError::config("public host must not be empty"));
        }
        Ok(())
    }
}

impl Default for DeskpoolConfig {
    fn default() -> Self {
        Self {
            database_url: constants::default_database_url(),
            runtime_endpoint: None,
            network: constants::DEFAULT_NETWORK.to_string(),
            image: constants::DEFAULT_IMAGE.to_string(),
            port_range: PortRange::default(),
            internal_port: constants::DEFAULT_INTERNAL_PORT,
            restart_max_retries: constants::DEFAULT_RESTART_MAX_RETRIES,
            operation_timeout: Duration::from_secs(constants::DEFAULT_OPERATION_TIMEOUT_SECS),
            allocation_attempts: constants::DEFAULT_ALLOCATION_ATTEMPTS,
            public_host: constants::DEFAULT_PUBLIC_HOST.to_string(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
