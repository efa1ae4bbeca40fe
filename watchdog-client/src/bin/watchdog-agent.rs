//! Watchdog agent
//!
//! Runs the configured health checks on their own schedules and reports
//! unresolved failures to the hub.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use watchdog_client::{scheduler, AgentConfig, Engine, EscalationPolicy, Runner, RpcTransport};
use watchdog_common::shutdown::spawn_signal_handlers;
use watchdog_common::{telemetry, DailyLog, RotationBoundary, Shutdown};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "watchdog-agent", version)]
#[command(about = "Watchdog agent: scheduled health checks with escalation")]
struct Cli {
    /// Task configuration file
    #[arg(short = 'c', long, default_value = "config.json")]
    config: PathBuf,

    /// Hub RPC address (HOST:PORT)
    #[arg(short = 'r', long, default_value = watchdog_common::DEFAULT_RPC_ADDR)]
    remote: String,

    /// Directory for daily log files
    #[arg(short = 'l', long, default_value = "log")]
    log_dir: PathBuf,

    /// Daily rotation boundary (HH:MM, local time)
    #[arg(long, default_value = "00:00")]
    rotate_at: RotationBoundary,

    /// Shutdown grace window in milliseconds
    #[arg(long, default_value_t = 2000)]
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
                "watchdog-agent: cannot open log directory {}: {}",
                cli.log_dir.display(),
                err
            );
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = telemetry::init_tracing(&log, cli.debug) {
        eprintln!("watchdog-agent: failed to initialise logging: {}", err);
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
        watchdog_build_info::formatted_banner("watchdog-agent", AGENT_VERSION)
    );

    let config = AgentConfig::load(&cli.config)
        .with_context(|| format!("could not load {}", cli.config.display()))?;
    if config.tasks.is_empty() {
        warn!("no tasks configured in {}", cli.config.display());
    }
    info!("---client ({}) started---", config.hostname);

    let shutdown = Shutdown::new();
    spawn_signal_handlers(shutdown.clone());
    log.spawn_rotation(cli.rotate_at, shutdown.listener());

    let transport = RpcTransport::connect(&cli.remote).await;
    let runner = Runner {
        hostname: config.hostname.clone(),
        engine: Arc::new(Engine::new(EscalationPolicy::AllMustSucceed)),
        transport: Arc::new(transport),
    };
    let handle = scheduler::spawn(config.tasks, runner, shutdown.listener());
    info!("scheduled {} task(s)", handle.len());

    shutdown.listener().wait().await;
    let report = handle.join(Duration::from_millis(cli.grace_ms)).await;
    if !report.abandoned.is_empty() {
        warn!(
            "left {} task(s) running: {}",
            report.abandoned.len(),
            report.abandoned.join(", ")
        );
    }
    Ok(())
}
