//! Lifecycle manager behaviour against a fake runtime and a fault-injecting
//! record store.
//!
//! Covered scenarios:
//! - create: happy path, every failing step, and the rollback each triggers
//! - stop: success, unknown record, instance removed out of band
//! - delete: idempotency, already-gone instances, removal failures
//! - connection info: status gating
//! - deadlines on runtime calls

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod support;

use std::collections::BTreeSet;
use std::time::Duration;

use deskpool_common::types::{ContainerStatus, PortRange, RecordId};
use deskpool_runtime::client::{RestartPolicy, RuntimeError};
use deskpool_runtime::lifecycle::{DeleteOutcome, LifecycleError};
use deskpool_runtime::store::{RecordStore, StoreError};

use support::{FakeRuntime, FlakyStore, RuntimeOp, StoreOp, manager, manager_with, settings};

// ── Create ───────────────────────────────────────────────────────────

#[tokio::test]
async fn create_starts_container_and_records_it_as_running() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);

    let created = manager.create().await.expect("create should succeed");

    assert_eq!(created.record.status, ContainerStatus::Running);
    assert_eq!(created.record.host_port, 7000);
    assert_eq!(created.record.internal_port, 6080);
    assert_eq!(created.connection_hint, "http://localhost:7000/vnc_auto.html");
    assert_eq!(runtime.is_running(&created.record.runtime_id), Some(true));

    let stored = store.get_by_id(created.record.id).await.unwrap().unwrap();
    assert_eq!(stored, created.record);
}

#[tokio::test]
async fn create_passes_configuration_to_the_runtime() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);

    let _ = manager.create().await.unwrap();

    let specs = runtime.specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].image, "desktop-image:latest");
    assert_eq!(specs[0].network, "deskpool_app_network");
    assert_eq!(specs[0].internal_port, 6080);
    assert_eq!(specs[0].host_port, 7000);
    assert_eq!(specs[0].restart_policy, RestartPolicy::OnFailure { max_retries: 5 });
}

#[tokio::test]
async fn successive_creates_get_distinct_ports() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);

    for _ in 0..5 {
        let _ = manager.create().await.unwrap();
    }

    let ports: BTreeSet<u16> = manager
        .list_all()
        .await
        .unwrap()
        .iter()
        .map(|r| r.host_port)
        .collect();
    assert_eq!(ports, BTreeSet::from([7000, 7001, 7002, 7003, 7004]));
}

#[tokio::test]
async fn create_reuses_port_released_by_delete() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);

    let first = manager.create().await.unwrap();
    let _second = manager.create().await.unwrap();
    let _ = manager.delete(first.record.id).await.unwrap();

    let third = manager.create().await.unwrap();
    assert_eq!(third.record.host_port, 7000);
}

#[tokio::test]
async fn exhausted_range_fails_with_no_available_port() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager_with(&runtime, &store, settings(PortRange::new(7000, 7000)));

    let _ = manager.create().await.unwrap();
    let err = manager.create().await.unwrap_err();

    assert!(matches!(err, LifecycleError::NoAvailablePort { .. }));
    assert_eq!(runtime.calls_of(RuntimeOp::Create).len(), 1);
}

#[tokio::test]
async fn runtime_create_failure_writes_no_record() {
    let runtime = FakeRuntime::new();
    runtime.fail(RuntimeOp::Create);
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);

    let err = manager.create().await.unwrap_err();

    assert!(matches!(err, LifecycleError::RuntimeCreateFailed { host_port: 7000, .. }));
    assert!(manager.list_all().await.unwrap().is_empty());
    assert!(runtime.calls_of(RuntimeOp::Remove).is_empty());
}

#[tokio::test]
async fn insert_failure_removes_the_created_instance() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    store.fail(StoreOp::Insert);
    let manager = manager(&runtime, &store);

    let err = manager.create().await.unwrap_err();

    match &err {
        LifecycleError::RecordPersistFailed { id, runtime_id, source } => {
            assert!(id.is_none());
            assert!(runtime_id.is_some());
            assert!(matches!(source, StoreError::Unavailable { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let removals = runtime.calls_of(RuntimeOp::Remove);
    assert_eq!(removals.len(), 1);
    assert!(removals[0].force);
    assert_eq!(runtime.instance_count(), 0);
    assert!(manager.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn start_failure_deletes_record_and_removes_instance() {
    let runtime = FakeRuntime::new();
    runtime.fail(RuntimeOp::Start);
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);

    let err = manager.create().await.unwrap_err();

    let LifecycleError::RuntimeStartFailed { id, runtime_id, .. } = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(runtime.calls_of(RuntimeOp::Remove).len(), 1);
    assert_eq!(runtime.calls_of(RuntimeOp::Remove)[0].target, runtime_id.as_str());
    assert_eq!(runtime.instance_count(), 0);
    assert!(store.get_by_id(*id).await.unwrap().is_none());
    assert!(manager.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn status_update_failure_rolls_back_instead_of_reporting_success() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    store.fail(StoreOp::UpdateStatus);
    let manager = manager(&runtime, &store);

    let err = manager.create().await.unwrap_err();

    assert!(matches!(err, LifecycleError::RecordPersistFailed { id: Some(_), .. }));
    assert_eq!(runtime.instance_count(), 0);
    assert!(store.records().await.is_empty());
}

#[tokio::test]
async fn failed_compensation_never_masks_the_primary_error() {
    let runtime = FakeRuntime::new();
    runtime.fail(RuntimeOp::Start);
    runtime.fail(RuntimeOp::Remove);
    let store = FlakyStore::new();
    store.fail(StoreOp::Delete);
    let manager = manager(&runtime, &store);

    let err = manager.create().await.unwrap_err();

    assert!(matches!(err, LifecycleError::RuntimeStartFailed { .. }));
    // Both compensation steps were attempted even though both failed.
    assert_eq!(runtime.calls_of(RuntimeOp::Remove).len(), 1);
    assert_eq!(store.records().await.len(), 1);
}

#[tokio::test]
async fn hung_start_times_out_and_rolls_back() {
    let runtime = FakeRuntime::new();
    runtime.hang(RuntimeOp::Start);
    let store = FlakyStore::new();
    let mut settings = settings(PortRange::new(7000, 8000));
    settings.operation_timeout = Duration::from_millis(50);
    let manager = manager_with(&runtime, &store, settings);

    let err = manager.create().await.unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::RuntimeStartFailed {
            source: RuntimeError::Timeout { operation: "start", .. },
            ..
        }
    ));
    assert_eq!(runtime.instance_count(), 0);
    assert!(store.records().await.is_empty());
}

#[tokio::test]
async fn hung_port_scan_times_out_before_any_runtime_call() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    store.hang(StoreOp::ListHostPorts);
    let mut settings = settings(PortRange::new(7000, 8000));
    settings.operation_timeout = Duration::from_millis(50);
    let manager = manager_with(&runtime, &store, settings);

    let err = tokio::time::timeout(Duration::from_secs(5), manager.create())
        .await
        .expect("create should give up on its own deadline")
        .unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::RecordLookupFailed {
            id: None,
            source: StoreError::Timeout { operation: "list_host_ports", .. },
        }
    ));
    assert!(runtime.calls().is_empty());
    assert!(store.records().await.is_empty());
}

#[tokio::test]
async fn unexpected_stored_status_rolls_back_before_start() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    store.insert_as(ContainerStatus::Stopped);
    let manager = manager(&runtime, &store);

    let err = manager.create().await.unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::InvalidTransition {
            from: ContainerStatus::Stopped,
            to: ContainerStatus::Running,
            ..
        }
    ));
    assert!(runtime.calls_of(RuntimeOp::Start).is_empty());
    assert_eq!(runtime.calls_of(RuntimeOp::Remove).len(), 1);
    assert_eq!(runtime.instance_count(), 0);
    assert!(store.records().await.is_empty());
}

// ── Stop ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_marks_record_stopped() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let created = manager.create().await.unwrap();

    let stopped = manager.stop(created.record.id).await.unwrap();

    assert_eq!(stopped.status, ContainerStatus::Stopped);
    assert_eq!(runtime.is_running(&created.record.runtime_id), Some(false));
    let stored = store.get_by_id(created.record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContainerStatus::Stopped);
}

#[tokio::test]
async fn stop_unknown_record_is_record_not_found() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);

    let err = manager.stop(RecordId::new(99)).await.unwrap_err();

    assert!(matches!(err, LifecycleError::RecordNotFound { .. }));
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn stop_after_out_of_band_removal_reports_not_found() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let created = manager.create().await.unwrap();
    runtime.vanish(&created.record.runtime_id);

    let err = manager.stop(created.record.id).await.unwrap_err();

    assert!(matches!(err, LifecycleError::RuntimeNotFound { .. }));
    assert!(err.is_not_found());
    let stored = store.get_by_id(created.record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContainerStatus::Running);
}

#[tokio::test]
async fn stop_runtime_failure_leaves_status_untouched() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let created = manager.create().await.unwrap();
    runtime.fail(RuntimeOp::Stop);

    let err = manager.stop(created.record.id).await.unwrap_err();

    assert!(matches!(err, LifecycleError::RuntimeStopFailed { .. }));
    assert!(!err.is_not_found());
    let stored = store.get_by_id(created.record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContainerStatus::Running);
}

// ── Delete ───────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_is_idempotent() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let created = manager.create().await.unwrap();

    let first = manager.delete(created.record.id).await;
    let second = manager.delete(created.record.id).await;

    assert_eq!(first.unwrap(), DeleteOutcome::Removed);
    assert!(matches!(second, Err(LifecycleError::RecordNotFound { .. })));
    assert_eq!(runtime.instance_count(), 0);
}

#[tokio::test]
async fn delete_stops_a_running_instance_before_removing_it() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let created = manager.create().await.unwrap();

    let _ = manager.delete(created.record.id).await.unwrap();

    let ops: Vec<RuntimeOp> = runtime.calls().iter().map(|c| c.op).collect();
    assert_eq!(
        ops,
        vec![
            RuntimeOp::Create,
            RuntimeOp::Start,
            RuntimeOp::Inspect,
            RuntimeOp::Stop,
            RuntimeOp::Remove,
        ]
    );
    assert!(!runtime.calls_of(RuntimeOp::Remove)[0].force);
}

#[tokio::test]
async fn delete_skips_stop_for_a_stopped_instance() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let created = manager.create().await.unwrap();
    let _ = manager.stop(created.record.id).await.unwrap();

    let _ = manager.delete(created.record.id).await.unwrap();

    assert_eq!(runtime.calls_of(RuntimeOp::Stop).len(), 1);
}

#[tokio::test]
async fn delete_with_instance_already_gone_still_removes_record() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let created = manager.create().await.unwrap();
    runtime.vanish(&created.record.runtime_id);

    let outcome = manager.delete(created.record.id).await.unwrap();

    assert_eq!(outcome, DeleteOutcome::RuntimeAlreadyGone);
    assert!(store.get_by_id(created.record.id).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_keeps_record_when_removal_fails() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let created = manager.create().await.unwrap();
    runtime.fail(RuntimeOp::Remove);

    let err = manager.delete(created.record.id).await.unwrap_err();

    assert!(matches!(err, LifecycleError::RuntimeRemoveFailed { .. }));
    assert!(store.get_by_id(created.record.id).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_after_failed_pre_stop_keeps_record() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let created = manager.create().await.unwrap();
    runtime.fail(RuntimeOp::Stop);

    // The instance is still running, so the non-forced removal fails and
    // the record is kept for a retry.
    let err = manager.delete(created.record.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::RuntimeRemoveFailed { .. }));
    assert_eq!(runtime.calls_of(RuntimeOp::Remove).len(), 1);
    assert!(store.get_by_id(created.record.id).await.unwrap().is_some());
}

// ── Connection info ──────────────────────────────────────────────────

#[tokio::test]
async fn connection_info_requires_running_status() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let never_started = store.seed("seeded", 7500, ContainerStatus::Created).await;

    let err = manager.connection_info(never_started.id).await.unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::NotRunning {
            status: ContainerStatus::Created,
            ..
        }
    ));
}

#[tokio::test]
async fn connection_info_returns_stored_port_without_mutation() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let created = manager.create().await.unwrap();
    let calls_before = runtime.calls().len();

    let info = manager.connection_info(created.record.id).await.unwrap();

    assert_eq!(info.host_port, created.record.host_port);
    assert_eq!(info.connection_hint, created.connection_hint);
    assert_eq!(runtime.calls().len(), calls_before);
    assert_eq!(store.records().await, vec![created.record]);
}

#[tokio::test]
async fn connection_info_on_stopped_container_is_not_running() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let created = manager.create().await.unwrap();
    let _ = manager.stop(created.record.id).await.unwrap();

    let err = manager.connection_info(created.record.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotRunning { .. }));
}

#[tokio::test]
async fn connection_info_unknown_record_is_not_found() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);

    let err = manager.connection_info(RecordId::new(1)).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn store_read_failure_is_classified_as_lookup_failure() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    store.fail(StoreOp::Get);
    let manager = manager(&runtime, &store);

    let err = manager.connection_info(RecordId::new(1)).await.unwrap_err();
    assert!(matches!(err, LifecycleError::RecordLookupFailed { id: Some(_), .. }));
}

// ── End to end ───────────────────────────────────────────────────────

#[tokio::test]
async fn create_stop_delete_round_trip() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);

    let created = manager.create().await.unwrap();
    assert_eq!(created.record.status, ContainerStatus::Running);
    assert!(PortRange::new(7000, 8000).contains(created.record.host_port));

    let stopped = manager.stop(created.record.id).await.unwrap();
    assert_eq!(stopped.status, ContainerStatus::Stopped);

    assert_eq!(manager.delete(created.record.id).await.unwrap(), DeleteOutcome::Removed);
    assert!(store.get_by_id(created.record.id).await.unwrap().is_none());
    assert_eq!(runtime.instance_count(), 0);
}

#[tokio::test]
async fn listing_is_newest_first() {
    let runtime = FakeRuntime::new();
    let store = FlakyStore::new();
    let manager = manager(&runtime, &store);
    let a = manager.create().await.unwrap();
    let b = manager.create().await.unwrap();

    let ids: Vec<RecordId> = manager.list_all().await.unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![b.record.id, a.record.id]);
}
