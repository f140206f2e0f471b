//! Logging initialization: stdout via `tracing-subscriber`, plus a daily
//! rolling file layer under `out/logs/` for the fleet's unattended runs.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize tracing with standard configuration (defaults to info level).
pub fn init_tracing(log_dir: &str) -> tracing_appender::non_blocking::WorkerGuard {
    init_tracing_with_level("info", log_dir)
}

/// Initialize tracing with a specific log level.
///
/// The level can be: error, warn, info, debug, trace. `RUST_LOG` overrides
/// the configured level. Returns the `WorkerGuard` for the file layer,
/// which must be held for the process lifetime or buffered lines are lost
/// on exit.
pub fn init_tracing_with_level(level: &str, log_dir: &str) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "fleet_core={level},fleet_supervisor={level},{level}",
                level = level
            ))
        })
    };

    let file_appender = tracing_appender::rolling::daily(log_dir, "fleet-supervisor.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(filter())
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard
}
