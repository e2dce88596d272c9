//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Honour `RUST_LOG`, falling back to the configured level
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging
//! - Library code only emits events; installing a subscriber is the host's call

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// `default_filter` is used when `RUST_LOG` is unset or invalid, e.g.
/// `"volgate=info"`. Returns `false` if a subscriber was already installed.
pub fn init_logging(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Filter directive for a bare log level such as `"debug"`.
pub fn level_filter(level: &str) -> String {
    format!("volgate={level},tower_http={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_refused() {
        let _ = init_logging("volgate=debug");
        assert!(!init_logging("volgate=debug"));
    }

    #[test]
    fn level_filter_scopes_crates() {
        assert_eq!(level_filter("warn"), "volgate=warn,tower_http=warn");
    }
}
