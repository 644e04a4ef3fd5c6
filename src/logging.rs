//! Tracing subscriber setup.
//!
//! Human-readable output always goes to stderr. When `logging.file` is set a
//! second, non-ANSI layer writes to that file through a non-blocking
//! appender; keep the returned guard alive for the life of the process so
//! buffered lines are flushed on exit.

use crate::config::LoggingConfig;
use crate::error::{BotError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Build the level filter. `RUST_LOG` wins over the configured level.
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => parse_filter(level),
    }
}

/// Parse a filter directive such as `info` or `afkbot=debug,warn`.
pub fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| BotError::Config(format!("logging.level {directives:?}: {e}")))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails on an unparsable level, an unusable log file path, or when a
/// global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(&config.level)?;
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let Some(path) = &config.file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr)
            .try_init()
            .map_err(|e| BotError::Config(format!("tracing init: {e}")))?;
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| BotError::Config(format!("logging.file {} has no file name", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| BotError::Config(format!("tracing init: {e}")))?;
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_targeted_levels() {
        assert!(parse_filter("info").is_ok());
        assert!(parse_filter("afkbot=debug,warn").is_ok());
    }

    #[test]
    fn rejects_unknown_level() {
        let err = parse_filter("afkbot=loud");
        assert!(matches!(err, Err(BotError::Config(_))));
    }
}
