//! CLI command definitions and dispatch.

pub mod connect;
pub mod create;
pub mod delete;
pub mod list;
pub mod stop;

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use deskpool_common::config::DeskpoolConfig;
use deskpool_common::constants;
use deskpool_common::types::PortRange;
use deskpool_runtime::client::DockerCliClient;
use deskpool_runtime::lifecycle::LifecycleManager;
use deskpool_runtime::store::open_store;

/// deskpool — ephemeral remote-desktop containers on demand.
#[derive(Parser, Debug)]
#[command(name = "dpool", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Print results as JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Runtime, store, and allocation settings.
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all managed desktop containers, newest first.
    List(list::ListArgs),
    /// Create and start a new desktop container.
    Create(create::CreateArgs),
    /// Stop a desktop container.
    Stop(stop::StopArgs),
    /// Remove a desktop container and its record.
    Delete(delete::DeleteArgs),
    /// Show how to connect to a running desktop container.
    Connect(connect::ConnectArgs),
}

/// Settings shared by every subcommand, each with an environment fallback.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Datastore connection string (`postgres://…`, `memory://`, `file:///path.json` or a path).
    #[arg(long, global = true, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Container runtime endpoint passed to the runtime CLI as `--host`.
    #[arg(long, global = true, env = "DESKPOOL_RUNTIME_ENDPOINT")]
    pub runtime_endpoint: Option<String>,

    /// Network desktop containers are attached to.
    #[arg(
        long,
        global = true,
        env = "DESKPOOL_NETWORK",
        default_value = constants::DEFAULT_NETWORK,
    )]
    pub network: String,

    /// Desktop container image.
    #[arg(long, global = true, env = "DESKPOOL_IMAGE", default_value = constants::DEFAULT_IMAGE)]
    pub image: String,

    /// First host port to hand out.
    #[arg(
        long,
        global = true,
        env = "DESKPOOL_PORT_RANGE_START",
        default_value_t = constants::DEFAULT_PORT_RANGE_START,
    )]
    pub port_range_start: u16,

    /// Last host port to hand out (inclusive).
    #[arg(
        long,
        global = true,
        env = "DESKPOOL_PORT_RANGE_END",
        default_value_t = constants::DEFAULT_PORT_RANGE_END,
    )]
    pub port_range_end: u16,

    /// Protocol port exposed by the image.
    #[arg(
        long,
        global = true,
        env = "DESKPOOL_INTERNAL_PORT",
        default_value_t = constants::DEFAULT_INTERNAL_PORT,
    )]
    pub internal_port: u16,

    /// Maximum automatic restarts of a failing container.
    #[arg(
        long,
        global = true,
        env = "DESKPOOL_RESTART_RETRIES",
        default_value_t = constants::DEFAULT_RESTART_MAX_RETRIES,
    )]
    pub restart_retries: u32,

    /// Deadline for each runtime and store call, in seconds.
    #[arg(
        long,
        global = true,
        env = "DESKPOOL_TIMEOUT_SECS",
        default_value_t = constants::DEFAULT_OPERATION_TIMEOUT_SECS,
    )]
    pub timeout_secs: u64,

    /// Allocation scans attempted when a port is taken concurrently.
    #[arg(
        long,
        global = true,
        env = "DESKPOOL_ALLOCATION_ATTEMPTS",
        default_value_t = constants::DEFAULT_ALLOCATION_ATTEMPTS,
    )]
    pub allocation_attempts: u32,

    /// Host name used in connection hints.
    #[arg(
        long,
        global = true,
        env = "DESKPOOL_PUBLIC_HOST",
        default_value = constants::DEFAULT_PUBLIC_HOST,
    )]
    pub public_host: String,
}

impl ConfigArgs {
    /// Builds the runtime configuration from the parsed flags.
    pub fn to_config(&self) -> DeskpoolConfig {
        DeskpoolConfig {
            database_url: self
                .database_url
                .clone()
                .unwrap_or_else(constants::default_database_url),
            runtime_endpoint: self.runtime_endpoint.clone(),
            network: self.network.clone(),
            image: self.image.clone(),
            port_range: PortRange::new(self.port_range_start, self.port_range_end),
            internal_port: self.internal_port,
            restart_max_retries: self.restart_retries,
            operation_timeout: Duration::from_secs(self.timeout_secs),
            allocation_attempts: self.allocation_attempts,
            public_host: self.public_host.clone(),
        }
    }
}

/// Builds a lifecycle manager backed by the Docker CLI and the configured store.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the store cannot be opened.
async fn build_manager(config: &DeskpoolConfig) -> anyhow::Result<LifecycleManager> {
    config.validate()?;
    let store = open_store(&config.database_url).await?;
    let runtime = Arc::new(DockerCliClient::new().with_host(config.runtime_endpoint.clone()));
    tracing::debug!(
        network = %config.network,
        image = %config.image,
        port_range = %config.port_range,
        "lifecycle manager configured"
    );
    Ok(LifecycleManager::from_config(runtime, store, config))
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let manager = build_manager(&cli.config.to_config()).await?;
    match cli.command {
        Command::List(args) => list::execute(&manager, args, cli.json).await,
        Command::Create(args) => create::execute(&manager, args, cli.json).await,
        Command::Stop(args) => stop::execute(&manager, args, cli.json).await,
        Command::Delete(args) => delete::execute(&manager, args, cli.json).await,
        Command::Connect(args) => connect::execute(&manager, args, cli.json).await,
    }
}
