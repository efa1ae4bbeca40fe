//! Watchdog hub daemon
//!
//! Receives alerts from agents over the RPC listener and pushes them to every
//! connected observer.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use watchdog_common::shutdown::spawn_signal_handlers;
use watchdog_common::{telemetry, DailyLog, RotationBoundary, Shutdown};
use watchdogd::HubOptions;

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "watchdogd", version)]
#[command(about = "Watchdog hub: fans agent alerts out to observers")]
struct Cli {
    /// Alert RPC listen address
    #[arg(long, default_value = "0.0.0.0:40090")]
    rpc_addr: String,

    /// Observer push channel listen address
    #[arg(long, default_value = "0.0.0.0:40080")]
    http_addr: String,

    /// Push channel path
    #[arg(long, default_value = watchdog_common::PUSH_ENDPOINT)]
    endpoint: String,

    /// Directory for daily log files
    #[arg(short = 'l', long, default_value = "log")]
    log_dir: PathBuf,

    /// Daily rotation boundary (HH:MM, local time)
    #[arg(long, default_value = "00:00")]
    rotate_at: RotationBoundary,

    /// Per-observer write timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    push_timeout_ms: u64,

    /// Shutdown grace window in milliseconds
    #[arg(long, default_value_t = 1000)]
    grace_ms: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log = match DailyLog::open(&cli.log_dir, vec![Box::new(std::io::stderr())]) {
        Ok(log) => log,
        Err(err) => {
            eprintln!(
                "watchdogd: cannot open log directory {}: {}",
                cli.log_dir.display(),
                err
            );
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = telemetry::init_tracing(&log, cli.debug) {
        eprintln!("watchdogd: failed to initialise logging: {}", err);
        return ExitCode::FAILURE;
    }

    let code = match run(cli, &log).await {
        Ok(()) => {
            info!("done");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    };
    log.close();
    code
}

async fn run(cli: Cli, log: &DailyLog) -> Result<()> {
    info!(
        "{}",
        watchdog_build_info::formatted_banner("watchdogd", DAEMON_VERSION)
    );

    let shutdown = Shutdown::new();
    spawn_signal_handlers(shutdown.clone());
    log.spawn_rotation(cli.rotate_at, shutdown.listener());

    let options = HubOptions {
        rpc_addr: cli.rpc_addr,
        http_addr: cli.http_addr,
        endpoint: cli.endpoint,
        push_timeout: Duration::from_millis(cli.push_timeout_ms),
    };
    let running = watchdogd::start(&options, &shutdown).await?;

    shutdown.listener().wait().await;
    info!("shutting down, grace window {}ms", cli.grace_ms);
    running.stop(Duration::from_millis(cli.grace_ms)).await;
    Ok(())
}
