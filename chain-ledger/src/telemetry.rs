//! Tracing subscriber setup for binaries
//!
//! The library only emits events; installing a subscriber is left to the
//! process that embeds it.

use crate::config::LoggingConfig;
use crate::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber
///
/// `RUST_LOG` wins over `default_filter` when set. Output goes to stderr so
/// JSON reports on stdout stay machine-readable.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| Error::Config(format!("Failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            json: false,
            default_filter: "chain_ledger=notalevel".to_string(),
        };
        assert!(matches!(init_tracing(&config), Err(Error::Config(_))));
    }
}
