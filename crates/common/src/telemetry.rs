use tracing_subscriber::EnvFilter;

use crate::logsink::DailyLog;

/// Route every `tracing` event of the process into `log`.
///
/// `RUST_LOG` wins over the default level when set.
pub fn init_tracing(
    log: &DailyLog,
    debug: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(log.clone())
        .try_init()
}
