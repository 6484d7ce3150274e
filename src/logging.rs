use color_eyre::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::data_dir;

const DEFAULT_FILTER: &str = "leadsync=info";

/// Log to a daily file under the data directory.
///
/// The filter comes from `LEADSYNC_LOG`. Keep the returned guard alive for the
/// life of the program or buffered lines are lost.
pub fn init() -> Result<WorkerGuard> {
  let dir = data_dir()?.join("logs");
  std::fs::create_dir_all(&dir)?;

  let appender = tracing_appender::rolling::daily(dir, "leadsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter =
    EnvFilter::try_from_env("LEADSYNC_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
