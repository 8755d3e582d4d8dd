//! Tracing subscriber setup.
//!
//! Stdout gets the configured format (JSON or pretty); when a log directory
//! is configured, a daily-rolling JSON file layer is added. The returned
//! guard must be held for the life of the process so the non-blocking file
//! writer flushes on exit.

use anyhow::{anyhow, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::domain::models::config::{LogConfig, LogFormat};

/// Initialize the global subscriber from configuration.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let default_level = parse_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    match &config.log_dir {
        Some(log_dir) => {
            let file_appender = rolling::daily(log_dir, "argus.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);

            if config.enable_stdout {
                match config.format {
                    LogFormat::Json => {
                        tracing_subscriber::registry()
                            .with(env_filter)
                            .with(file_layer)
                            .with(
                                tracing_subscriber::fmt::layer()
                                    .json()
                                    .with_writer(io::stdout),
                            )
                            .init();
                    }
                    LogFormat::Pretty => {
                        tracing_subscriber::registry()
                            .with(env_filter)
                            .with(file_layer)
                            .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
                            .init();
                    }
                }
            } else {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer)
                    .init();
            }
            Ok(Some(guard))
        }
        None => {
            match config.format {
                LogFormat::Json => {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(
                            tracing_subscriber::fmt::layer()
                                .json()
                                .with_writer(io::stdout),
                        )
                        .init();
                }
                LogFormat::Pretty => {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
                        .init();
                }
            }
            Ok(None)
        }
    }
}

fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!(
            "invalid log level '{other}': expected trace, debug, info, warn, or error"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing() {
        assert_eq!(parse_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert!(parse_level("loud").is_err());
    }
}
