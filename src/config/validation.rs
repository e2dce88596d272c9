//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;
use crate::net::Endpoint;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("endpoint: {0}")]
    Endpoint(String),
    #[error("driver must not be empty")]
    EmptyDriver,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("invalid metrics address: {0}")]
    MetricsAddress(String),
    #[error("invalid log level: {0}")]
    LogLevel(String),
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = Endpoint::parse(config.endpoint().trim()) {
        errors.push(ValidationError::Endpoint(e.to_string()));
    }
    if config.driver.trim().is_empty() {
        errors.push(ValidationError::EmptyDriver);
    }

    let positive = [
        ("mux.sniff_timeout_ms", config.mux.sniff_timeout_ms as usize),
        ("mux.max_sniff_bytes", config.mux.max_sniff_bytes),
        ("mux.queue_size", config.mux.queue_size),
        ("warmup.interval_ms", config.warmup.interval_ms as usize),
    ];
    for (name, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }
    if config.stop_timeout_secs == Some(0) {
        errors.push(ValidationError::Zero("stop_timeout_secs"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(obs.metrics_address.clone()));
    }
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::LogLevel(obs.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.endpoint = Some("udp://0.0.0.0:1".into());
        config.driver = " ".into();
        config.mux.queue_size = 0;
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".into();
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::EmptyDriver));
        assert!(errors.contains(&ValidationError::Zero("mux.queue_size")));
        assert!(matches!(errors[0], ValidationError::Endpoint(_)));
    }
}
