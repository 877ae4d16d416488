//! `dpool list` — List managed desktop containers.

use clap::Args;
use deskpool_common::types::ContainerStatus;
use deskpool_runtime::lifecycle::LifecycleManager;

use crate::output;

/// Arguments for the `list` command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show running containers.
    #[arg(short, long)]
    pub running: bool,
}

/// Executes the `list` command.
///
/// # Errors
///
/// Returns an error if the record store cannot be read.
pub async fn execute(
    manager: &LifecycleManager,
    args: ListArgs,
    json: bool,
) -> anyhow::Result<()> {
    let records = manager.list_all().await?;
    let records: Vec<_> = if args.running {
        records
            .into_iter()
            .filter(|r| r.status == ContainerStatus::Running)
            .collect()
    } else {
        records
    };

    if json {
        return output::print_json(&records);
    }
    if records.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    println!(
        "{:<6} {:<14} {:<10} {:<10} {:<12}",
        "ID", "CONTAINER", "STATUS", "HOST PORT", "CREATED"
    );
    for r in &records {
        println!(
            "{:<6} {:<14} {:<10} {:<10} {:<12}",
            r.id,
            r.runtime_id.short(),
            r.status,
            r.host_port,
            output::format_age(r.created_at, chrono::Utc::now())
        );
    }
    Ok(())
}
