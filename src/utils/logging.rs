//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry built from [`LoggingConfig`].
//! `RUST_LOG` overrides the configured level when set.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(json: bool) -> BoxedLayer {
    if json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    }
}

fn file_layer(path: &str, json: bool) -> Result<BoxedLayer> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ProtocolError::ConfigError(format!("Failed to open log file {path}: {e}")))?;
    let writer = Mutex::new(file);

    Ok(if json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_ansi(false).with_writer(writer).boxed()
    })
}

/// Install the global subscriber.
///
/// # Errors
/// `ConfigError` if the log file cannot be opened or a global subscriber is
/// already installed. Callers that may initialise twice can ignore the error.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.log_to_console {
        layers.push(console_layer(config.json_format));
    }
    if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProtocolError::ConfigError("log_file_path must be set when log_to_file is true".into())
        })?;
        layers.push(file_layer(path, config.json_format)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("Failed to install subscriber: {e}")))?;

    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_requires_path() {
        let config = LoggingConfig {
            log_to_console: false,
            log_to_file: true,
            log_file_path: None,
            ..LoggingConfig::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }
}
