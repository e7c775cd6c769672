//! Structured logging configuration.
//!
//! Thin wrapper over `tracing-subscriber`: the configured level acts as
//! the default filter, and the `RUST_LOG` environment variable still
//! overrides it for ad-hoc debugging.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call more than once; later
/// calls are no-ops, which keeps test binaries that share a process
/// happy.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init(&config);
        init(&config);
    }

    #[test]
    fn test_bad_level_falls_back() {
        init(&LoggingConfig {
            level: "not-a-level///".into(),
        });
    }
}
