//! `dpool delete` — Remove a desktop container and its record.

use clap::Args;
use deskpool_common::types::RecordId;
use deskpool_runtime::lifecycle::{DeleteOutcome, LifecycleManager};
use serde::Serialize;

use crate::output;

/// Arguments for the `delete` command.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Container ID as shown by `dpool list`.
    pub id: RecordId,
}

#[derive(Serialize)]
struct Deleted {
    id: RecordId,
    outcome: DeleteOutcome,
}

/// Executes the `delete` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or the runtime fails to
/// remove it; in the latter case the record is kept so the delete can be
/// retried.
pub async fn execute(
    manager: &LifecycleManager,
    args: DeleteArgs,
    json: bool,
) -> anyhow::Result<()> {
    let outcome = manager.delete(args.id).await?;

    if json {
        return output::print_json(&Deleted {
            id: args.id,
            outcome,
        });
    }
    match outcome {
        DeleteOutcome::Removed => println!("Container {} removed.", args.id),
        DeleteOutcome::RuntimeAlreadyGone => println!(
            "Container {} was already gone from the runtime; record removed.",
            args.id
        ),
    }
    Ok(())
}
