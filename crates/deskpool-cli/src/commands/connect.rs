//! `dpool connect` — Show how to reach a running desktop.

use clap::Args;
use deskpool_common::types::RecordId;
use deskpool_runtime::lifecycle::LifecycleManager;

use crate::output;

/// Arguments for the `connect` command.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Container ID as shown by `dpool list`.
    pub id: RecordId,
}

/// Executes the `connect` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or not running.
pub async fn execute(
    manager: &LifecycleManager,
    args: ConnectArgs,
    json: bool,
) -> anyhow::Result<()> {
    let info = manager.connection_info(args.id).await?;

    if json {
        return output::print_json(&info);
    }
    println!("Host port: {}", info.host_port);
    println!("Connect at {}", info.connection_hint);
    Ok(())
}
