//! Desktop container lifecycle management for deskpool.
//!
//! The [`LifecycleManager`](lifecycle::LifecycleManager) allocates a host
//! port, creates and starts a container through a
//! [`RuntimeClient`](client::RuntimeClient), and tracks it in a
//! [`RecordStore`](store::RecordStore), rolling back partial progress when a
//! step fails.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod client;
pub mod compensation;
pub mod deadline;
pub mod lifecycle;
pub mod ports;
pub mod store;
