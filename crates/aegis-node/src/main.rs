//! aegis-node — the operator binary for the Aegis automation keeper.
//!
//! Startup sequence:
//!   1. Read and validate the environment configuration
//!   2. Open (or initialise) the platform state under --data-dir
//!   3. Dispatch the scheduler subcommand:
//!        run      — tick until ctrl-c
//!        run-once — a single tick, then exit
//!        status   — print the executor identity and execution flag
//!
//! Exit codes: 0 on clean stop, 1 on configuration validation failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use aegis_adapters::{SystemClock, WalletAdapter};
use aegis_keeper::{Keeper, KeeperConfig, KeeperOptions, Platform, PlatformConfig};

#[derive(Parser, Debug)]
#[command(
    name = "aegis-node",
    version,
    about = "Aegis keeper — bounded automation for on-chain asset management"
)]
struct Args {
    /// Directory for the event log and projection database.
    #[arg(long, default_value = "~/.aegis/data")]
    data_dir: PathBuf,

    /// Seconds between scheduler ticks.
    #[arg(long, default_value_t = 60)]
    tick_interval_s: u64,

    /// Milliseconds between per-item submissions inside a tick.
    #[arg(long, default_value_t = aegis_core::constants::KEEPER_SPACING_MS)]
    spacing_ms: u64,

    /// Due-work page size for registry scans.
    #[arg(long, default_value_t = aegis_core::constants::DUE_WORK_PAGE_SIZE)]
    page_size: usize,

    #[command(subcommand)]
    command: NodeCommand,
}

#[derive(Subcommand, Debug)]
enum NodeCommand {
    /// Keeper scheduler operations.
    Scheduler {
        #[command(subcommand)]
        action: SchedulerAction,
    },
}

#[derive(Subcommand, Debug)]
enum SchedulerAction {
    /// Run the keeper loop until interrupted.
    Run,
    /// Run a single tick, print the report, and exit.
    RunOnce,
    /// Print executor identity, custody balance, and the execution flag.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,aegis=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    // Config validation failures exit with status 1.
    let config = match KeeperConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let executor = config.executor_address();
    let platform_config = PlatformConfig {
        // The custodial binary runs operator and executor as one principal.
        operator: executor,
        executor,
        numeraire: config.numeraire_token,
        // The DCA adapter address doubles as the venue principal.
        venue: config.dca_adapter,
        fee_recipient: executor,
    };
    let platform = Platform::open(&data_dir, &platform_config, Arc::new(SystemClock))
        .context("opening platform state")?;

    info!(
        chain = %config.chain_endpoint,
        executor = %executor,
        execution_enabled = config.execution_enabled,
        "platform ready"
    );

    let options = KeeperOptions {
        page_size: args.page_size,
        spacing: Duration::from_millis(args.spacing_ms),
        tick_interval: Duration::from_secs(args.tick_interval_s),
        execution_enabled: config.execution_enabled,
        use_projection: config.indexer_endpoint.is_some(),
    };

    match args.command {
        NodeCommand::Scheduler {
            action: SchedulerAction::Status,
        } => {
            let custody = platform.wallet().custody_balance(config.numeraire_token);
            println!("executor address:  {executor}");
            println!("custody balance:   {custody}");
            println!("execution enabled: {}", config.execution_enabled);
        }
        NodeCommand::Scheduler {
            action: SchedulerAction::RunOnce,
        } => {
            let (mut keeper, _shutdown) = Keeper::new(platform, options);
            let report = keeper.tick().await;
            println!(
                "tick: selected={} executed={} dry_run={} failed={} skipped={}",
                report.selected,
                report.executed,
                report.dry_run,
                report.failed,
                report.skipped.len()
            );
            for (id, reason) in &report.skipped {
                println!("  skipped {id}: {reason}");
            }
        }
        NodeCommand::Scheduler {
            action: SchedulerAction::Run,
        } => {
            let (mut keeper, shutdown) = Keeper::new(platform, options);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("ctrl-c received; stopping after the current item");
                    let _ = shutdown.send(true);
                }
            });
            keeper.run().await;
        }
    }

    Ok(())
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
