//! `dpool stop` — Stop a desktop container.

use clap::Args;
use deskpool_common::types::RecordId;
use deskpool_runtime::lifecycle::{LifecycleError, LifecycleManager};

use crate::output;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container ID as shown by `dpool list`.
    pub id: RecordId,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container is unknown, already gone from the
/// runtime, or cannot be stopped.
pub async fn execute(
    manager: &LifecycleManager,
    args: StopArgs,
    json: bool,
) -> anyhow::Result<()> {
    let record = match manager.stop(args.id).await {
        Ok(record) => record,
        Err(e @ LifecycleError::RuntimeNotFound { .. }) => {
            anyhow::bail!("{e}; it may have been removed or already stopped")
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        return output::print_json(&record);
    }
    println!("Container {} stopped.", record.id);
    Ok(())
}
