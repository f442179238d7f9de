//! Diagnostics output.
//!
//! The crate itself only emits `tracing` events. Hosts without their own
//! subscriber can install one here.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::config(format!("invalid log filter {}: {}", config.level, e)))?;

    let result = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .try_init()
    };

    result.map_err(|e| Error::InvalidState(format!("tracing subscriber already set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig {
            level: "hlt_components=debug".to_string(),
            json: false,
        };
        // Another test may have installed a subscriber first.
        let _ = init_tracing(&config);
        assert!(matches!(
            init_tracing(&config),
            Err(Error::InvalidState(_))
        ));
    }
}
