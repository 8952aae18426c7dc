//! Logging setup for the CLI

use std::path::Path;

use signalgate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize console logging, plus a rolling file when `log_file` is set.
///
/// `RUST_LOG` overrides the configured level. Returns the guard that must be
/// kept alive for the duration of the program.
pub fn init_logging(config: &LoggingConfig, log_file: Option<&Path>) -> Option<WorkerGuard> {
  let level = parse_log_level(&config.level);
  let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

  let console = fmt::layer().with_target(true).with_writer(std::io::stderr);

  let Some(path) = log_file else {
    tracing_subscriber::registry().with(env_filter).with(console).init();
    return None;
  };

  let dir = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };
  let file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "signalgate.log".into());

  if std::fs::create_dir_all(dir).is_err() {
    // Fall back to console-only logging
    tracing_subscriber::registry().with(env_filter).with(console).init();
    return None;
  }

  let file_appender = match config.rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(dir, file_name),
    "never" => tracing_appender::rolling::never(dir, file_name),
    _ => tracing_appender::rolling::daily(dir, file_name),
  };
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(env_filter)
    .with(console)
    .with(fmt::layer().with_target(true).with_ansi(false).with_writer(file_writer))
    .init();

  Some(guard)
}
