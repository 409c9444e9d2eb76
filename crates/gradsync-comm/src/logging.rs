//! Logging - Tracing Subscriber Setup
//!
//! The communicator logs through `tracing`. Training binaries call
//! [`init`] once; `RUST_LOG` wins over the configured filter.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::CommConfig;

/// Installs a global fmt subscriber filtered by `RUST_LOG` or `default_filter`.
///
/// Returns false if a global subscriber was already installed.
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// Installs the subscriber using the filter from `config`.
pub fn init_from_config(config: &CommConfig) -> bool {
    init(&config.log_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let _ = init("gradsync=debug");
        assert!(!init("gradsync=debug"));
        assert!(!init_from_config(&CommConfig::default()));
    }
}
