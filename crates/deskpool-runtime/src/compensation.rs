//! Best-effort rollback of a partially completed create.
//!
//! A [`Rollback`] removes the runtime instance and/or deletes the record that
//! a failed create left behind. Its own failures are emitted on the
//! `deskpool::compensation` tracing target and never replace the error that
//! triggered it: [`Rollback::run`] always hands the primary error back.

use std::fmt;
use std::time::Duration;

use deskpool_common::types::{RecordId, RuntimeId};

use crate::client::RuntimeClient;
use crate::deadline;
use crate::lifecycle::LifecycleError;
use crate::store::{RecordStore, StoreError};

/// Result of a single compensation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step undid its target.
    Done,
    /// The target was already gone.
    AlreadyGone,
    /// The step failed; the message is kept for diagnostics only.
    Failed(String),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("done"),
            Self::AlreadyGone => f.write_str("already gone"),
            Self::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// What a rollback did, step by step. `None` means the step was not needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    /// Forced removal of the runtime instance.
    pub instance_removal: Option<StepOutcome>,
    /// Deletion of the durable record.
    pub record_deletion: Option<StepOutcome>,
}

impl CompensationReport {
    /// Returns whether every attempted step left nothing behind.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        [&self.instance_removal, &self.record_deletion]
            .into_iter()
            .flatten()
            .all(|outcome| !matches!(outcome, StepOutcome::Failed(_)))
    }
}

/// Pending compensation for a create that failed part-way.
pub struct Rollback<'a> {
    runtime: &'a dyn RuntimeClient,
    store: &'a dyn RecordStore,
    timeout: Duration,
    instance: Option<RuntimeId>,
    record: Option<RecordId>,
}

impl<'a> Rollback<'a> {
    /// Starts an empty rollback using the given collaborators and deadline.
    #[must_use]
    pub fn new(
        runtime: &'a dyn RuntimeClient,
        store: &'a dyn RecordStore,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            store,
            timeout,
            instance: None,
            record: None,
        }
    }

    /// Schedules forced removal of a runtime instance.
    #[must_use]
    pub fn remove_instance(mut self, id: &RuntimeId) -> Self {
        self.instance = Some(id.clone());
        self
    }

    /// Schedules deletion of a record.
    #[must_use]
    pub const fn delete_record(mut self, id: RecordId) -> Self {
        self.record = Some(id);
        self
    }

    /// Executes the scheduled steps and returns `primary` unchanged.
    pub async fn run(self, primary: LifecycleError) -> LifecycleError {
        let report = self.execute().await;
        if report.is_clean() {
            tracing::info!(
                target: "deskpool::compensation",
                error = %primary,
                "rolled back failed create"
            );
        } else {
            tracing::error!(
                target: "deskpool::compensation",
                error = %primary,
                instance_removal = ?report.instance_removal,
                record_deletion = ?report.record_deletion,
                "rollback incomplete, manual cleanup may be required"
            );
        }
        primary
    }

    /// Executes the scheduled steps, instance first, and reports each outcome.
    pub async fn execute(self) -> CompensationReport {
        let mut report = CompensationReport::default();

        if let Some(runtime_id) = &self.instance {
            let outcome = match deadline::runtime_call(
                "remove",
                self.timeout,
                self.runtime.remove(runtime_id, true),
            )
            .await
            {
                Ok(()) => StepOutcome::Done,
                Err(e) if e.is_not_found() => StepOutcome::AlreadyGone,
                Err(e) => StepOutcome::Failed(e.to_string()),
            };
            log_step("remove instance", runtime_id.as_str(), &outcome);
            report.instance_removal = Some(outcome);
        }

        if let Some(id) = self.record {
            let outcome =
                match deadline::store_call("delete", self.timeout, self.store.delete(id)).await {
                    Ok(()) => StepOutcome::Done,
                    Err(StoreError::NotFound { .. }) => StepOutcome::AlreadyGone,
                    Err(e) => StepOutcome::Failed(e.to_string()),
                };
            log_step("delete record", &id.to_string(), &outcome);
            report.record_deletion = Some(outcome);
        }

        report
    }
}

fn log_step(step: &str, target_id: &str, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Done | StepOutcome::AlreadyGone => tracing::debug!(
            target: "deskpool::compensation",
            step,
            id = target_id,
            %outcome,
            "compensation step finished"
        ),
        StepOutcome::Failed(_) => tracing::warn!(
            target: "deskpool::compensation",
            step,
            id = target_id,
            %outcome,
            "compensation step failed"
        ),
    }
}
