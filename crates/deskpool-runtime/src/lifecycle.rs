//! Desktop container lifecycle manager.
//!
//! Orchestrates the port allocator, the container runtime, and the record
//! store for create, stop, delete, and connection lookups. The record store
//! is the single source of truth; no in-process locking is used, so
//! concurrent requests only serialise through the store itself.
//!
//! Create writes the record *before* starting the instance so that a failed
//! start always leaves something to roll back, never a running container
//! the store does not know about.

use std::sync::Arc;
use std::time::Duration;

use deskpool_common::config::DeskpoolConfig;
use deskpool_common::types::{
    ConnectionInfo, ContainerRecord, ContainerStatus, PortRange, RecordId, RuntimeId,
    connection_hint,
};
use serde::Serialize;
use thiserror::Error;

use crate::client::{InstanceSpec, RestartPolicy, RuntimeClient, RuntimeError};
use crate::compensation::Rollback;
use crate::deadline::{runtime_call, store_call};
use crate::ports::{AllocationError, PortAllocator};
use crate::store::{NewRecord, RecordStore, StoreError};

/// Errors surfaced by the lifecycle manager.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Every host port in the range is assigned.
    #[error("no available host port in range {range}")]
    NoAvailablePort {
        /// The exhausted range.
        range: PortRange,
    },

    /// The runtime refused to create the instance; nothing was persisted.
    #[error("failed to create container on host port {host_port}: {source}")]
    RuntimeCreateFailed {
        /// Port the instance would have been published on.
        host_port: u16,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// The runtime refused to start the instance; the create was rolled back.
    #[error("failed to start container {runtime_id} (record {id}): {source}")]
    RuntimeStartFailed {
        /// Record that was rolled back.
        id: RecordId,
        /// Instance that failed to start.
        runtime_id: RuntimeId,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// The runtime no longer knows the instance behind a record.
    #[error("container {runtime_id} for record {id} no longer exists in the runtime")]
    RuntimeNotFound {
        /// Record naming the instance.
        id: RecordId,
        /// Instance the runtime did not recognise.
        runtime_id: RuntimeId,
    },

    /// The runtime failed to stop the instance.
    #[error("failed to stop container {runtime_id} (record {id}): {source}")]
    RuntimeStopFailed {
        /// Record naming the instance.
        id: RecordId,
        /// Instance that failed to stop.
        runtime_id: RuntimeId,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// The runtime failed to remove the instance; the record was kept.
    #[error("failed to remove container {runtime_id} (record {id}): {source}")]
    RuntimeRemoveFailed {
        /// Record left in place for a retry.
        id: RecordId,
        /// Instance that failed to be removed.
        runtime_id: RuntimeId,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// Writing to the record store failed.
    #[error(
        "failed to persist record{}{}: {source}",
        id_suffix(.id.as_ref()),
        runtime_suffix(.runtime_id.as_ref())
    )]
    RecordPersistFailed {
        /// Record being written, if it had been assigned.
        id: Option<RecordId>,
        /// Instance the record describes, if known.
        runtime_id: Option<RuntimeId>,
        /// Underlying store error.
        source: StoreError,
    },

    /// Reading from the record store failed.
    #[error("failed to read container records: {source}")]
    RecordLookupFailed {
        /// Record being read, if a single one.
        id: Option<RecordId>,
        /// Underlying store error.
        source: StoreError,
    },

    /// No record has the given ID.
    #[error("container {id} not found")]
    RecordNotFound {
        /// The missing record.
        id: RecordId,
    },

    /// The container exists but is not running.
    #[error("container {id} status is '{status}', not running")]
    NotRunning {
        /// The container.
        id: RecordId,
        /// Its current status.
        status: ContainerStatus,
    },

    /// The requested status change is not part of the lifecycle.
    #[error("container {id} cannot move from '{from}' to '{to}'")]
    InvalidTransition {
        /// The container.
        id: RecordId,
        /// Its current status.
        from: ContainerStatus,
        /// The rejected target status.
        to: ContainerStatus,
    },
}

impl LifecycleError {
    /// Returns whether the transport should report this as "not found".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RecordNotFound { .. } | Self::RuntimeNotFound { .. }
        )
    }

    const fn is_port_conflict(&self) -> bool {
        matches!(
            self,
            Self::RecordPersistFailed {
                source: StoreError::PortConflict { .. },
                ..
            }
        )
    }
}

fn id_suffix(id: Option<&RecordId>) -> String {
    id.map_or_else(String::new, |id| format!(" {id}"))
}

fn runtime_suffix(runtime_id: Option<&RuntimeId>) -> String {
    runtime_id.map_or_else(String::new, |rt| format!(" (container {rt})"))
}

/// Checks a status change against the lifecycle before it is applied.
fn transition(record: &ContainerRecord, to: ContainerStatus) -> Result<ContainerStatus> {
    if record.status.can_transition_to(to) {
        Ok(to)
    } else {
        Err(LifecycleError::InvalidTransition {
            id: record.id,
            from: record.status,
            to,
        })
    }
}

/// Convenience alias for lifecycle results.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// A freshly created, running desktop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedContainer {
    /// The stored record, status `running`.
    pub record: ContainerRecord,
    /// URL the desktop is served at.
    pub connection_hint: String,
}

/// How a successful delete went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The runtime instance and the record were removed.
    Removed,
    /// The runtime instance was already gone; the record was removed.
    RuntimeAlreadyGone,
}

/// Settings the lifecycle manager takes from [`DeskpoolConfig`].
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Desktop image reference.
    pub image: String,
    /// Network the desktops join.
    pub network: String,
    /// Protocol port inside the container.
    pub internal_port: u16,
    /// Host ports available for publishing.
    pub port_range: PortRange,
    /// Automatic restart policy.
    pub restart_policy: RestartPolicy,
    /// Deadline for each collaborator call.
    pub operation_timeout: Duration,
    /// Allocation scans attempted before a port conflict is reported.
    pub allocation_attempts: u32,
    /// Host name used in connection hints.
    pub public_host: String,
}

impl From<&DeskpoolConfig> for LifecycleSettings {
    fn from(config: &DeskpoolConfig) -> Self {
        Self {
            image: config.image.clone(),
            network: config.network.clone(),
            internal_port: config.internal_port,
            port_range: config.port_range,
            restart_policy: RestartPolicy::OnFailure {
                max_retries: config.restart_max_retries,
            },
            operation_timeout: config.operation_timeout,
            allocation_attempts: config.allocation_attempts.max(1),
            public_host: config.public_host.clone(),
        }
    }
}

/// Orchestrates desktop container lifecycles.
pub struct LifecycleManager {
    runtime: Arc<dyn RuntimeClient>,
    store: Arc<dyn RecordStore>,
    allocator: PortAllocator,
    settings: LifecycleSettings,
}

impl LifecycleManager {
    /// Creates a manager over the given collaborators.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        store: Arc<dyn RecordStore>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            runtime,
            store,
            allocator: PortAllocator::new(settings.port_range),
            settings,
        }
    }

    /// Creates a manager configured from a [`DeskpoolConfig`].
    #[must_use]
    pub fn from_config(
        runtime: Arc<dyn RuntimeClient>,
        store: Arc<dyn RecordStore>,
        config: &DeskpoolConfig,
    ) -> Self {
        Self::new(runtime, store, LifecycleSettings::from(config))
    }

    /// Returns the active settings.
    #[must_use]
    pub const fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Lists all records, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::RecordLookupFailed`] if the store cannot be read.
    pub async fn list_all(&self) -> Result<Vec<ContainerRecord>> {
        store_call("list", self.timeout(), self.store.list_all())
            .await
            .map_err(|source| LifecycleError::RecordLookupFailed { id: None, source })
    }

    /// Returns the record with the given ID.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::RecordNotFound`] if there is no such record.
    pub async fn get(&self, id: RecordId) -> Result<ContainerRecord> {
        store_call("get", self.timeout(), self.store.get_by_id(id))
            .await
            .map_err(|source| LifecycleError::RecordLookupFailed {
                id: Some(id),
                source,
            })?
            .ok_or(LifecycleError::RecordNotFound { id })
    }

    /// Allocates a port, creates and starts a desktop, and records it.
    ///
    /// Any failure after the instance exists is rolled back before the
    /// error is returned. A port lost to a concurrent create is retried
    /// with a fresh allocation scan.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the first step that failed.
    pub async fn create(&self) -> Result<CreatedContainer> {
        let mut attempt = 1;
        loop {
            match self.try_create().await {
                Err(e) if e.is_port_conflict() && attempt < self.settings.allocation_attempts => {
                    tracing::warn!(attempt, error = %e, "host port taken concurrently, rescanning");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_create(&self) -> Result<CreatedContainer> {
        let timeout = self.timeout();
        let host_port = self
            .allocator
            .allocate(self.store.as_ref(), timeout)
            .await
            .map_err(|e| match e {
                AllocationError::NoAvailablePort { range } => {
                    LifecycleError::NoAvailablePort { range }
                }
                AllocationError::Store { source } => {
                    LifecycleError::RecordLookupFailed { id: None, source }
                }
            })?;

        let spec = InstanceSpec {
            image: self.settings.image.clone(),
            network: self.settings.network.clone(),
            internal_port: self.settings.internal_port,
            host_port,
            restart_policy: self.settings.restart_policy,
        };
        tracing::info!(
            host_port,
            internal_port = spec.internal_port,
            network = %spec.network,
            image = %spec.image,
            "creating desktop container"
        );
        let runtime_id = runtime_call("create", timeout, self.runtime.create(&spec))
            .await
            .map_err(|source| LifecycleError::RuntimeCreateFailed { host_port, source })?;
        tracing::info!(runtime_id = %runtime_id, host_port, "container created");

        let new_record = NewRecord {
            runtime_id: runtime_id.clone(),
            internal_port: spec.internal_port,
            host_port,
            status: ContainerStatus::Created,
        };
        let record = match store_call("insert", timeout, self.store.insert(new_record)).await {
            Ok(record) => record,
            Err(source) => {
                let primary = LifecycleError::RecordPersistFailed {
                    id: None,
                    runtime_id: Some(runtime_id.clone()),
                    source,
                };
                return Err(self.rollback().remove_instance(&runtime_id).run(primary).await);
            }
        };
        tracing::info!(id = %record.id, runtime_id = %runtime_id, "container record saved");

        let running = match transition(&record, ContainerStatus::Running) {
            Ok(status) => status,
            Err(primary) => {
                return Err(self
                    .rollback()
                    .remove_instance(&runtime_id)
                    .delete_record(record.id)
                    .run(primary)
                    .await);
            }
        };

        if let Err(source) = runtime_call("start", timeout, self.runtime.start(&runtime_id)).await {
            let primary = LifecycleError::RuntimeStartFailed {
                id: record.id,
                runtime_id: runtime_id.clone(),
                source,
            };
            return Err(self
                .rollback()
                .remove_instance(&runtime_id)
                .delete_record(record.id)
                .run(primary)
                .await);
        }
        tracing::info!(id = %record.id, runtime_id = %runtime_id, "container started");

        // Leaving the record at `created` while the instance runs would make it
        // unreachable through `connection_info`, so this failure is rolled back too.
        if let Err(source) = store_call(
            "update_status",
            timeout,
            self.store.update_status(record.id, running),
        )
        .await
        {
            let primary = LifecycleError::RecordPersistFailed {
                id: Some(record.id),
                runtime_id: Some(runtime_id.clone()),
                source,
            };
            return Err(self
                .rollback()
                .remove_instance(&runtime_id)
                .delete_record(record.id)
                .run(primary)
                .await);
        }
        tracing::info!(id = %record.id, host_port, "container status updated to running");

        let connection_hint = connection_hint(&self.settings.public_host, record.host_port);
        Ok(CreatedContainer {
            record: ContainerRecord {
                status: running,
                ..record
            },
            connection_hint,
        })
    }

    /// Stops the desktop behind a record and marks it `stopped`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::RecordNotFound`] for an unknown ID and
    /// [`LifecycleError::RuntimeNotFound`] when the instance was removed
    /// out of band.
    pub async fn stop(&self, id: RecordId) -> Result<ContainerRecord> {
        let timeout = self.timeout();
        let record = self.get(id).await?;
        let stopped = transition(&record, ContainerStatus::Stopped)?;

        match runtime_call("stop", timeout, self.runtime.stop(&record.runtime_id)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    id = %id,
                    runtime_id = %record.runtime_id,
                    "container not found in runtime, already gone"
                );
                return Err(LifecycleError::RuntimeNotFound {
                    id,
                    runtime_id: record.runtime_id,
                });
            }
            Err(source) => {
                return Err(LifecycleError::RuntimeStopFailed {
                    id,
                    runtime_id: record.runtime_id,
                    source,
                });
            }
        }
        tracing::info!(id = %id, runtime_id = %record.runtime_id, "container stopped");

        match store_call("update_status", timeout, self.store.update_status(id, stopped)).await {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => return Err(LifecycleError::RecordNotFound { id }),
            Err(source) => {
                return Err(LifecycleError::RecordPersistFailed {
                    id: Some(id),
                    runtime_id: Some(record.runtime_id),
                    source,
                });
            }
        }

        Ok(ContainerRecord {
            status: stopped,
            ..record
        })
    }

    /// Removes the desktop behind a record, then the record itself.
    ///
    /// A running instance is stopped first. An instance the runtime no
    /// longer knows counts as already removed, so the record is still
    /// deleted and the call succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::RecordNotFound`] for an unknown ID and
    /// [`LifecycleError::RuntimeRemoveFailed`] if the runtime fails to remove
    /// the instance, in which case the record is kept for a retry.
    pub async fn delete(&self, id: RecordId) -> Result<DeleteOutcome> {
        let timeout = self.timeout();
        let record = self.get(id).await?;
        let runtime_id = &record.runtime_id;

        match runtime_call("inspect", timeout, self.runtime.inspect(runtime_id)).await {
            Ok(state) if state.running => {
                tracing::info!(
                    id = %id,
                    runtime_id = %runtime_id,
                    "stopping container before removal"
                );
                match runtime_call("stop", timeout, self.runtime.stop(runtime_id)).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => tracing::warn!(
                        id = %id,
                        runtime_id = %runtime_id,
                        error = %e,
                        "could not stop container before removal"
                    ),
                }
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(id = %id, runtime_id = %runtime_id, "inspect found no container");
            }
            Err(e) => tracing::warn!(
                id = %id,
                runtime_id = %runtime_id,
                error = %e,
                "could not inspect container before removal"
            ),
        }

        let removal = runtime_call("remove", timeout, self.runtime.remove(runtime_id, false)).await;
        let outcome = match removal {
            Ok(()) => DeleteOutcome::Removed,
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    id = %id,
                    runtime_id = %runtime_id,
                    "container not found in runtime, deleting record anyway"
                );
                DeleteOutcome::RuntimeAlreadyGone
            }
            Err(source) => {
                return Err(LifecycleError::RuntimeRemoveFailed {
                    id,
                    runtime_id: record.runtime_id,
                    source,
                });
            }
        };

        match store_call("delete", timeout, self.store.delete(id)).await {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                tracing::debug!(id = %id, "record already deleted by a concurrent request");
            }
            Err(source) => {
                return Err(LifecycleError::RecordPersistFailed {
                    id: Some(id),
                    runtime_id: Some(record.runtime_id),
                    source,
                });
            }
        }
        tracing::info!(id = %id, runtime_id = %record.runtime_id, ?outcome, "container removed");
        Ok(outcome)
    }

    /// Returns how to reach a running desktop. Never mutates state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::RecordNotFound`] for an unknown ID and
    /// [`LifecycleError::NotRunning`] unless the status is `running`.
    pub async fn connection_info(&self, id: RecordId) -> Result<ConnectionInfo> {
        let record = self.get(id).await?;
        match record.status {
            ContainerStatus::Running => Ok(ConnectionInfo {
                host_port: record.host_port,
                connection_hint: connection_hint(&self.settings.public_host, record.host_port),
            }),
            status @ (ContainerStatus::Created | ContainerStatus::Stopped) => {
                Err(LifecycleError::NotRunning { id, status })
            }
        }
    }

    fn rollback(&self) -> Rollback<'_> {
        Rollback::new(
            self.runtime.as_ref(),
            self.store.as_ref(),
            self.settings.operation_timeout,
        )
    }

    const fn timeout(&self) -> Duration {
        self.settings.operation_timeout
    }
}
