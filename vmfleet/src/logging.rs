//! Tracing subscriber setup for the `vmfleet` binary.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};
use vmfleet_shared::{FleetError, FleetResult};

/// Install the global subscriber.
///
/// Logs go to stderr (level from `RUST_LOG`, `info` by default) and, with
/// `log_dir`, to a daily-rotated `vmfleet.log` there as well. Keep the
/// returned guard alive until exit or buffered file lines are lost.
pub fn init_logging(log_dir: Option<&Path>, ansi: bool) -> FleetResult<Option<WorkerGuard>> {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(ansi);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "vmfleet.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| FleetError::Internal(format!("failed to install tracing subscriber: {}", e)))?;

    Ok(guard)
}
