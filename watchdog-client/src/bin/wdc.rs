//! wdc: prints alerts pushed by the watchdog hub.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use watchdog_client::observer::{self, AlertPrinter, WatchEnd};
use watchdog_common::shutdown::spawn_signal_handlers;
use watchdog_common::{telemetry, DailyLog, RotationBoundary, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "wdc", version)]
#[command(about = "Terminal observer for the watchdog hub")]
struct Cli {
    /// Hub push channel address (HOST:PORT)
    #[arg(short = 'r', long, default_value = watchdog_common::DEFAULT_PUSH_ADDR)]
    remote: String,

    /// Push channel path
    #[arg(long = "ep", default_value = watchdog_common::PUSH_ENDPOINT)]
    endpoint: String,

    /// Log directory [default: $HOME/WatchDog-client/logs]
    #[arg(short = 'l', long)]
    log_dir: Option<PathBuf>,

    /// Grace window after closing, in milliseconds
    #[arg(long, default_value_t = 300)]
    grace_ms: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn default_log_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join("WatchDog-client").join("logs"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(log_dir) = cli.log_dir.clone().or_else(default_log_dir) else {
        eprintln!("wdc: could not find your home directory, pass --log-dir");
        return ExitCode::FAILURE;
    };
    let log = match DailyLog::open(&log_dir, Vec::new()) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("wdc: could not set logger in {}: {}", log_dir.display(), err);
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = telemetry::init_tracing(&log, cli.debug) {
        eprintln!("wdc: failed to initialise logging: {}", err);
        return ExitCode::FAILURE;
    }

    let code = match run(&cli, &log).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("wdc: {:#}", err);
            ExitCode::FAILURE
        }
    };
    log.close();
    code
}

async fn run(cli: &Cli, log: &DailyLog) -> Result<()> {
    info!("{}", watchdog_build_info::formatted_banner("wdc", env!("CARGO_PKG_VERSION")));

    let shutdown = Shutdown::new();
    spawn_signal_handlers(shutdown.clone());
    log.spawn_rotation(RotationBoundary::MIDNIGHT, shutdown.listener());

    let url = observer::push_url(&cli.remote, &cli.endpoint);
    let stream = observer::dial(&url).await?;
    eprintln!("connected to {}", cli.remote);

    let mut printer = AlertPrinter::new(std::io::stdout());
    let end = observer::watch(stream, &mut printer, shutdown.listener())
        .await
        .context("lost the push channel")?;

    if end == WatchEnd::Interrupted {
        eprintln!("saving logs..");
        tokio::time::sleep(Duration::from_millis(cli.grace_ms)).await;
    }
    eprintln!("done");
    Ok(())
}
