//! Domain primitive types used across the deskpool workspace.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeskpoolError;

/// Surrogate identifier of a container record, assigned by the record store.
///
/// Every public lifecycle operation names a container by this ID, never by
/// the runtime's own identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Wraps a raw store-assigned identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = DeskpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| DeskpoolError::config(format!("invalid container id: {s:?}")))
    }
}

/// Opaque identifier of a container instance, assigned by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeId(String);

impl RuntimeId {
    /// Creates a runtime ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first twelve characters, the way container runtimes
    /// abbreviate IDs in listings.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a tracked desktop container.
///
/// Removal is not a status: a removed container has no record at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The runtime instance exists but has not been started yet.
    Created,
    /// The runtime instance has been started.
    Running,
    /// The runtime instance has been stopped.
    Stopped,
}

impl ContainerStatus {
    /// Returns whether a record in this status may move to `next`.
    ///
    /// Stopping is idempotent; nothing returns to `Created`, and a stopped
    /// desktop is never restarted in place.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Created, Self::Running | Self::Stopped)
            | (Self::Running | Self::Stopped, Self::Stopped) => true,
            (Self::Created | Self::Running | Self::Stopped, Self::Created)
            | (Self::Running | Self::Stopped, Self::Running) => false,
        }
    }

    /// Returns the lowercase name stored in records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerStatus {
    type Err = DeskpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            other => Err(DeskpoolError::config(format!(
                "unknown container status: {other:?}"
            ))),
        }
    }
}

/// Inclusive range of host ports the allocator may hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port of the range.
    pub start: u16,
    /// Last port of the range (inclusive).
    pub end: u16,
}

impl PortRange {
    /// Creates a range from its inclusive bounds.
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Returns whether `port` lies inside the range.
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// Iterates the range in ascending order.
    pub fn iter(&self) -> std::ops::RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(
            crate::constants::DEFAULT_PORT_RANGE_START,
            crate::constants::DEFAULT_PORT_RANGE_END,
        )
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Durable record of a desktop container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Surrogate identifier assigned on insert.
    pub id: RecordId,
    /// Identifier returned by the runtime on creation.
    pub runtime_id: RuntimeId,
    /// Protocol port exposed inside the container.
    pub internal_port: u16,
    /// Host port mapped to `internal_port`; unique among stored records.
    pub host_port: u16,
    /// Current lifecycle status.
    pub status: ContainerStatus,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
}

/// How a caller reaches a running desktop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Externally reachable host port.
    pub host_port: u16,
    /// URL the desktop is served at.
    pub connection_hint: String,
}

/// Builds the connection hint URL for a desktop published on `host_port`.
#[must_use]
pub fn connection_hint(public_host: &str, host_port: u16) -> String {
    format!(
        "http://{public_host}:{host_port}{}",
        crate::constants::CONNECTION_HINT_PATH
    )
}
