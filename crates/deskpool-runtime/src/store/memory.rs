//! Process-local record store.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use deskpool_common::types::{ContainerRecord, ContainerStatus, RecordId};

use super::table::RecordTable;
use super::{NewRecord, RecordStore, StoreError};

/// Record store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<RecordTable>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<MutexGuard<'_, RecordTable>, StoreError> {
        self.table.lock().map_err(|_| StoreError::Unavailable {
            message: "record table lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, record: NewRecord) -> Result<ContainerRecord, StoreError> {
        self.table()?.insert(record)
    }

    async fn get_by_id(&self, id: RecordId) -> Result<Option<ContainerRecord>, StoreError> {
        Ok(self.table()?.get(id))
    }

    async fn update_status(&self, id: RecordId, status: ContainerStatus) -> Result<(), StoreError> {
        self.table()?.update_status(id, status)
    }

    async fn delete(&self, id: RecordId) -> Result<(), StoreError> {
        self.table()?.delete(id)
    }

    async fn list_host_ports(&self) -> Result<BTreeSet<u16>, StoreError> {
        Ok(self.table()?.host_ports())
    }

    async fn list_all(&self) -> Result<Vec<ContainerRecord>, StoreError> {
        Ok(self.table()?.list_newest_first())
    }
}
