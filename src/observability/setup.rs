//! One-call observability setup for the embedding host.

use std::net::SocketAddr;

use crate::config::GatewayConfig;
use crate::observability::logging::{init_logging, level_filter};
use crate::observability::metrics::init_metrics;

/// Why observability could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),
    #[error("metrics exporter: {0}")]
    Exporter(#[from] metrics_exporter_prometheus::BuildError),
}

/// What [`init_observability`] installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    /// False when the host had already installed a subscriber.
    pub logging: bool,
    /// Exporter address, when metrics are enabled.
    pub metrics: Option<SocketAddr>,
}

/// Apply `config.observability`: logging at `log_level` (unless `RUST_LOG`
/// says otherwise) and, when enabled, the Prometheus exporter.
///
/// Call once per process, before starting modules.
pub fn init_observability(config: &GatewayConfig) -> Result<Installed, ObservabilityError> {
    let obs = &config.observability;
    let logging = init_logging(&level_filter(&obs.log_level));

    let metrics = if obs.metrics_enabled {
        let addr: SocketAddr = obs
            .metrics_address
            .parse()
            .map_err(|_| ObservabilityError::MetricsAddress(obs.metrics_address.clone()))?;
        init_metrics(addr)?;
        Some(addr)
    } else {
        None
    };

    Ok(Installed { logging, metrics })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_metrics_address_is_reported() {
        let mut config = GatewayConfig::default();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".into();

        let err = init_observability(&config).unwrap_err();
        assert!(matches!(err, ObservabilityError::MetricsAddress(ref a) if a == "nowhere"));
    }

    #[test]
    fn disabled_metrics_install_nothing() {
        let installed = init_observability(&GatewayConfig::default()).unwrap();
        assert_eq!(installed.metrics, None);
    }
}
