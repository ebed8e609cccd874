//! Structured logging setup driven by [`LoggingConfig`].
//!
//! `RUST_LOG` takes precedence over the configured level when it is set.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;
    info!(app = %config.app_name, json = config.json_format, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_config_error() {
        let config = LoggingConfig::default();
        // The first call may lose to another test's subscriber; the second never wins.
        let _ = init_logging(&config);
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, ProtocolError::ConfigError(_)));
    }
}
