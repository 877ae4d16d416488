//! Durable record store.
//!
//! The store is the single source of truth for which host ports are in use.
//! PostgreSQL enforces host-port uniqueness with a unique index; the local
//! stores share [`table::RecordTable`], which does the same in process.

pub mod json;
pub mod memory;
pub mod postgres;
pub mod table;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deskpool_common::constants::MEMORY_DATABASE_URL;
use deskpool_common::error::{DeskpoolError, Result};
use deskpool_common::types::{ContainerRecord, ContainerStatus, RecordId, RuntimeId};
use thiserror::Error;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use postgres::PgRecordStore;

/// Values supplied by the caller when inserting a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    /// Identifier returned by the runtime.
    pub runtime_id: RuntimeId,
    /// Protocol port inside the container.
    pub internal_port: u16,
    /// Allocated host port.
    pub host_port: u16,
    /// Initial status.
    pub status: ContainerStatus,
}

/// Errors reported by a [`RecordStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another live record already holds the host port.
    #[error("host port {port} is already assigned{}", holder_suffix(.holder.as_ref()))]
    PortConflict {
        /// The contested port.
        port: u16,
        /// Record currently holding it, if it could be identified.
        holder: Option<RecordId>,
    },

    /// No record has the given ID.
    #[error("container record {id} not found")]
    NotFound {
        /// The missing record.
        id: RecordId,
    },

    /// Reading or writing the backing file failed.
    #[error("record store I/O error at {path}: {source}")]
    Io {
        /// Backing file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The backing file could not be encoded or decoded.
    #[error("record store serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// The database rejected or failed a query.
    #[error("record store database error: {source}")]
    Database {
        /// Underlying driver error.
        #[from]
        source: sqlx::Error,
    },

    /// A stored row could not be mapped to a record.
    #[error("malformed container record: {message}")]
    Corrupt {
        /// What was wrong with the row.
        message: String,
    },

    /// The call did not complete before its deadline.
    #[error("record store {operation} timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Name of the store operation.
        operation: &'static str,
        /// Deadline that expired.
        timeout: Duration,
    },

    /// The store cannot serve requests.
    #[error("record store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

fn holder_suffix(holder: Option<&RecordId>) -> String {
    holder.map_or_else(String::new, |id| format!(" to container {id}"))
}

/// Durable table of container records consumed by the lifecycle manager.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a record, assigning its surrogate ID and creation time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PortConflict`] if the host port is already held.
    async fn insert(&self, record: NewRecord) -> std::result::Result<ContainerRecord, StoreError>;

    /// Looks a record up by surrogate ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn get_by_id(
        &self,
        id: RecordId,
    ) -> std::result::Result<Option<ContainerRecord>, StoreError>;

    /// Replaces the status of a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    async fn update_status(
        &self,
        id: RecordId,
        status: ContainerStatus,
    ) -> std::result::Result<(), StoreError>;

    /// Deletes a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    async fn delete(&self, id: RecordId) -> std::result::Result<(), StoreError>;

    /// Returns every host port currently held by a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn list_host_ports(&self) -> std::result::Result<BTreeSet<u16>, StoreError>;

    /// Returns all records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn list_all(&self) -> std::result::Result<Vec<ContainerRecord>, StoreError>;
}

/// Opens the store selected by a datastore connection string.
///
/// `postgres://` and `postgresql://` connect to PostgreSQL and create the
/// schema if needed; `memory://` yields a process-local store;
/// `file:///path` or a bare path yields a JSON file store.
///
/// # Errors
///
/// Returns an error if the scheme is unsupported, the database cannot be
/// reached, or the file cannot be loaded.
pub async fn open_store(database_url: &str) -> Result<Arc<dyn RecordStore>> {
    let url = database_url.trim();
    if url == MEMORY_DATABASE_URL {
        tracing::debug!("using in-memory record store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PgRecordStore::connect(url)
            .await
            .map_err(|e| DeskpoolError::Datastore {
                message: e.to_string(),
            })?;
        return Ok(Arc::new(store));
    }
    let path = if let Some(path) = url.strip_prefix("file://") {
        path
    } else if url.contains("://") {
        return Err(DeskpoolError::config(format!(
            "unsupported datastore connection string: {url}"
        )));
    } else {
        url
    };
    if path.is_empty() {
        return Err(DeskpoolError::config("datastore path must not be empty"));
    }
    Ok(Arc::new(JsonFileStore::open(PathBuf::from(path))?))
}
