//! Deadlines for calls into the runtime and the record store.
//!
//! An expired deadline becomes that collaborator's ordinary error, so callers
//! handle a hung call exactly like a failed one.

use std::future::Future;
use std::time::Duration;

use crate::client::RuntimeError;
use crate::store::StoreError;

/// Awaits a runtime call, failing with [`RuntimeError::Timeout`] after `timeout`.
///
/// # Errors
///
/// Returns the call's own error, or a timeout.
pub async fn runtime_call<T>(
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<T, RuntimeError>>,
) -> Result<T, RuntimeError> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(RuntimeError::Timeout { operation, timeout }))
}

/// Awaits a store call, failing with [`StoreError::Timeout`] after `timeout`.
///
/// # Errors
///
/// Returns the call's own error, or a timeout.
pub async fn store_call<T>(
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(StoreError::Timeout { operation, timeout }))
}
