use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use switchyard_core::{ReleaseVersion, Slot};
use switchyard_rollout::RollbackTarget;

mod commands;

use commands::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "switchyard",
    about = "Blue-green release controller for single-host compose deployments",
    version
)]
struct Cli {
    /// Path to switchyard.toml
    #[arg(
        long,
        global = true,
        env = "SWITCHYARD_CONFIG",
        default_value = "switchyard.toml"
    )]
    config: PathBuf,

    /// Output format: text or json
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Deploy a version into the idle slot and promote it once ready
    Deploy {
        /// Release version (image tag) to deploy
        #[arg(long = "version", value_name = "ID")]
        release: ReleaseVersion,
        /// Show what would happen without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Redeploy an earlier version into the idle slot.
    ///
    /// `previous` picks the last release of the idle slot, or the most
    /// recent promoted version that differs from the live one.
    Rollback {
        #[arg(long, value_name = "previous|ID", default_value = "previous")]
        to: RollbackTarget,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
        /// Show what would happen without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Poll a readiness endpoint (default: the live slot's)
    HealthCheck {
        #[arg(long)]
        url: Option<String>,
        /// Wall-clock budget in seconds
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
        /// Log every attempt
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show the live slot and the state of both slots
    Status,
    /// Record which slot is live after a promotion failed half way
    Reconcile {
        /// Slot that should carry traffic (blue or green)
        #[arg(long)]
        slot: Slot,
    },
    /// Show recent release events, newest first
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Write a switchyard.toml scaffold
    Init {
        /// Project name (compose project prefix)
        #[arg(long)]
        name: String,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::HealthCheck { verbose: true, .. });
    init_tracing(verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(commands::exit_code(&err))
        }
    }
}

/// Logs go to stderr; stdout carries the report.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,switchyard=debug"
    } else {
        "warn,switchyard=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let format = cli.format;
    match cli.command {
        Commands::Deploy { release, dry_run } => {
            commands::deploy::run(&cli.config, format, release, dry_run).await
        }
        Commands::Rollback { to, force, dry_run } => {
            commands::rollback::run(&cli.config, format, to, force, dry_run).await
        }
        Commands::HealthCheck { url, timeout, .. } => {
            commands::health::run(&cli.config, format, url, timeout).await
        }
        Commands::Status => commands::status::run(&cli.config, format).await,
        Commands::Reconcile { slot } => commands::reconcile::run(&cli.config, format, slot).await,
        Commands::History { limit } => commands::history::run(&cli.config, format, limit),
        Commands::Init { name, force } => commands::init::run(&cli.config, &name, force),
    }
}
