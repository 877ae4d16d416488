//! Host port allocation.
//!
//! Allocation is a read-then-decide scan over the ports the record store
//! currently holds. Two concurrent scans can pick the same port; the store
//! rejects the second insert and the lifecycle manager rescans, so the
//! race costs a retry instead of a duplicate binding.

use std::collections::BTreeSet;
use std::time::Duration;

use deskpool_common::types::PortRange;

use crate::deadline::store_call;
use crate::store::{RecordStore, StoreError};

/// Errors raised while allocating a host port.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// Every port in the range is held by a record.
    #[error("no available host port in range {range}")]
    NoAvailablePort {
        /// The exhausted range.
        range: PortRange,
    },

    /// The held ports could not be read.
    #[error("could not read assigned host ports: {source}")]
    Store {
        /// Underlying store error.
        #[from]
        source: StoreError,
    },
}

/// Picks unused host ports from a bounded range.
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    range: PortRange,
}

impl PortAllocator {
    /// Creates an allocator over `range`.
    #[must_use]
    pub const fn new(range: PortRange) -> Self {
        Self { range }
    }

    /// Returns the configured range.
    #[must_use]
    pub const fn range(&self) -> PortRange {
        self.range
    }

    /// Returns the lowest port of the range not held by any record.
    ///
    /// Reading the held ports is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::NoAvailablePort`] if the range is exhausted
    /// and [`AllocationError::Store`] if the store fails or times out.
    pub async fn allocate(
        &self,
        store: &dyn RecordStore,
        timeout: Duration,
    ) -> Result<u16, AllocationError> {
        let used = store_call("list_host_ports", timeout, store.list_host_ports()).await?;
        let port = self.first_free(&used)?;
        tracing::debug!(port, held = used.len(), range = %self.range, "host port allocated");
        Ok(port)
    }

    /// Scans the range in ascending order for a port absent from `used`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::NoAvailablePort`] if the range is exhausted.
    pub fn first_free(&self, used: &BTreeSet<u16>) -> Result<u16, AllocationError> {
        self.range
            .iter()
            .find(|port| !used.contains(port))
            .ok_or(AllocationError::NoAvailablePort { range: self.range })
    }
}
