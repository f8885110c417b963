use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE: &str = "datajud-sync.log";

/// Install the global subscriber.
///
/// Logs go to stderr, or to a daily rolling file under `log_dir`, so stdout
/// stays reserved for command output. `RUST_LOG` overrides the default `info`
/// filter. Keep the guard alive until exit or buffered lines are lost.
pub fn init(log_dir: Option<&Path>) -> Result<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let (writer, guard) = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE))
    }
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(log_dir.is_none()))
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(guard)
}
