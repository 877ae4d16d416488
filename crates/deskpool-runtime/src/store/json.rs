//! JSON file record store.
//!
//! Every call takes an advisory lock on a sidecar `<file>.lock`, re-reads the
//! snapshot under it, and for mutations writes the whole table back before
//! releasing the lock. Separate handles and separate processes on the same
//! path therefore see each other's writes and share one host-port check.
//! Writes go to a temporary file in the same directory which is then renamed
//! over the target, so a crash never leaves a torn file.
//!
//! File work runs on the blocking pool, so a caller's deadline still fires
//! while the disk or the lock is stalled.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use deskpool_common::error::{DeskpoolError, Result};
use deskpool_common::types::{ContainerRecord, ContainerStatus, RecordId};
use fs2::FileExt;

use super::table::RecordTable;
use super::{NewRecord, RecordStore, StoreError};

/// Record store persisted as a JSON snapshot on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

impl JsonFileStore {
    /// Opens the store at `path`, validating an existing snapshot.
    ///
    /// A missing file is an empty store; the file is created on first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the path has no file name, or the file exists but
    /// cannot be read or parsed.
    pub fn open(path: PathBuf) -> Result<Self> {
        let Some(file_name) = path.file_name() else {
            return Err(DeskpoolError::config(format!(
                "datastore path has no file name: {}",
                path.display()
            )));
        };
        let mut lock_name = file_name.to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);

        let table = load_table(&path).map_err(open_error)?;
        tracing::debug!(path = %path.display(), records = table.len(), "record store opened");
        Ok(Self { path, lock_path })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the advisory lock file guarding the backing file.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Runs `apply` against the current snapshot under the file lock, saving
    /// the table afterwards for [`Access::Write`]. A failed `apply` or save
    /// leaves the file untouched.
    async fn locked<T, F>(&self, access: Access, apply: F) -> std::result::Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut RecordTable) -> std::result::Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = acquire_lock(&lock_path, access)?;
            let mut table = load_table(&path)?;
            let value = apply(&mut table)?;
            if access == Access::Write {
                save_table(&path, &table)?;
            }
            Ok(value)
        })
        .await
        .map_err(|e| StoreError::Unavailable {
            message: format!("record store task failed: {e}"),
        })?
    }
}

fn open_error(error: StoreError) -> DeskpoolError {
    match error {
        StoreError::Io { path, source } => DeskpoolError::Io { path, source },
        StoreError::Serialization { source } => DeskpoolError::Serialization { source },
        other => DeskpoolError::Datastore {
            message: other.to_string(),
        },
    }
}

/// Opens the lock file and blocks until the lock is granted. The lock is
/// released when the returned handle is dropped.
fn acquire_lock(lock_path: &Path, access: Access) -> std::result::Result<File, StoreError> {
    let io_err = |source| StoreError::Io {
        path: lock_path.to_path_buf(),
        source,
    };
    if let Some(dir) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(io_err)?;
    let granted = match access {
        Access::Read => FileExt::lock_shared(&file),
        Access::Write => FileExt::lock_exclusive(&file),
    };
    granted.map_err(io_err)?;
    Ok(file)
}

fn load_table(path: &Path) -> std::result::Result<RecordTable, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RecordTable::new()),
        Err(e) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    if content.trim().is_empty() {
        return Ok(RecordTable::new());
    }
    Ok(serde_json::from_str(&content)?)
}

fn save_table(path: &Path, table: &RecordTable) -> std::result::Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let json = serde_json::to_vec_pretty(table)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&json).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    let _ = tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn insert(&self, record: NewRecord) -> std::result::Result<ContainerRecord, StoreError> {
        self.locked(Access::Write, move |table| table.insert(record)).await
    }

    async fn get_by_id(
        &self,
        id: RecordId,
    ) -> std::result::Result<Option<ContainerRecord>, StoreError> {
        self.locked(Access::Read, move |table| Ok(table.get(id))).await
    }

    async fn update_status(
        &self,
        id: RecordId,
        status: ContainerStatus,
    ) -> std::result::Result<(), StoreError> {
        self.locked(Access::Write, move |table| table.update_status(id, status))
            .await
    }

    async fn delete(&self, id: RecordId) -> std::result::Result<(), StoreError> {
        self.locked(Access::Write, move |table| table.delete(id)).await
    }

    async fn list_host_ports(&self) -> std::result::Result<BTreeSet<u16>, StoreError> {
        self.locked(Access::Read, |table| Ok(table.host_ports())).await
    }

    async fn list_all(&self) -> std::result::Result<Vec<ContainerRecord>, StoreError> {
        self.locked(Access::Read, |table| Ok(table.list_newest_first()))
            .await
    }
}
