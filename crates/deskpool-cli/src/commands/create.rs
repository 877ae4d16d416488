//! `dpool create` — Create and start a new desktop container.

use clap::Args;
use deskpool_runtime::lifecycle::LifecycleManager;

use crate::output;

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Print only the new container's ID.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Executes the `create` command.
///
/// # Errors
///
/// Returns an error if no port is free or any create step fails. Partial
/// progress has already been rolled back when the error is returned.
pub async fn execute(
    manager: &LifecycleManager,
    args: CreateArgs,
    json: bool,
) -> anyhow::Result<()> {
    let created = manager.create().await?;

    if json {
        return output::print_json(&created);
    }
    if args.quiet {
        println!("{}", created.record.id);
        return Ok(());
    }
    println!(
        "Container {} created and started (runtime id {}, host port {}).",
        created.record.id,
        created.record.runtime_id.short(),
        created.record.host_port
    );
    println!("Connect at {}", created.connection_hint);
    Ok(())
}
