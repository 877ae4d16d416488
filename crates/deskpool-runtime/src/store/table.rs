//! In-process record table shared by the store implementations.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use deskpool_common::types::{ContainerRecord, ContainerStatus, RecordId};
use serde::{Deserialize, Serialize};

use super::{NewRecord, StoreError};

/// Records keyed by surrogate ID plus the next ID to hand out.
///
/// This is also the on-disk snapshot format of the JSON store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTable {
    next_id: u64,
    records: BTreeMap<RecordId, ContainerRecord>,
}

impl RecordTable {
    /// Creates an empty table whose first ID is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_id: 1,
            records: BTreeMap::new(),
        }
    }

    /// Inserts a record, rejecting a host port already held by another record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PortConflict`] naming the current holder.
    pub fn insert(&mut self, new: NewRecord) -> Result<ContainerRecord, StoreError> {
        if let Some(holder) = self.records.values().find(|r| r.host_port == new.host_port) {
            return Err(StoreError::PortConflict {
                port: new.host_port,
                holder: Some(holder.id),
            });
        }
        let id = RecordId::new(self.next_id);
        self.next_id += 1;
        let record = ContainerRecord {
            id,
            runtime_id: new.runtime_id,
            internal_port: new.internal_port,
            host_port: new.host_port,
            status: new.status,
            created_at: Utc::now(),
        };
        let _ = self.records.insert(id, record.clone());
        Ok(record)
    }

    /// Returns a copy of the record with the given ID.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<ContainerRecord> {
        self.records.get(&id).cloned()
    }

    /// Replaces the status of a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    pub fn update_status(
        &mut self,
        id: RecordId,
        status: ContainerStatus,
    ) -> Result<(), StoreError> {
        let record = self.records.get_mut(&id).ok_or(StoreError::NotFound { id })?;
        record.status = status;
        Ok(())
    }

    /// Removes a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    pub fn delete(&mut self, id: RecordId) -> Result<(), StoreError> {
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { id })
    }

    /// Returns the set of held host ports.
    #[must_use]
    pub fn host_ports(&self) -> BTreeSet<u16> {
        self.records.values().map(|r| r.host_port).collect()
    }

    /// Returns all records, newest first.
    ///
    /// Ties on the creation time are broken by the higher ID.
    #[must_use]
    pub fn list_newest_first(&self) -> Vec<ContainerRecord> {
        let mut all: Vec<_> = self.records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        all
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether the table holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for RecordTable {
    fn default() -> Self {
        Self::new()
    }
}
