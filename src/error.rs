//! Crate-level error types.

use crate::config::ConfigError;
use crate::lifecycle::BarrierError;
use crate::net::{EndpointError, ListenerError};

/// Errors surfaced to the embedding host.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No endpoint address was configured.
    #[error("missing endpoint address")]
    MissingAddress,
    /// The configured control-plane driver is not registered.
    #[error("unknown driver: {0}")]
    UnknownDriver(String),
    /// No module constructor is registered under this kind.
    #[error("unknown module kind: {0}")]
    UnknownModule(String),
    /// `start` was called on a running module.
    #[error("module already started")]
    AlreadyStarted,
    /// Multiplexing is enabled but no bridge factory was provided.
    #[error("legacy bridge enabled but no bridge factory is configured")]
    NoBridge,
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Barrier(#[from] BarrierError),
}

/// Why a server's serve loop ended.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// The server was stopped before or while serving.
    #[error("server closed")]
    ServerClosed,
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("{0}")]
    Other(String),
}

impl ServeError {
    /// Whether this only reflects a planned shutdown.
    pub fn is_closed(&self) -> bool {
        match self {
            ServeError::ServerClosed => true,
            ServeError::Listener(e) => e.is_closed(),
            _ => false,
        }
    }
}

/// Result alias for host-facing operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn closed_conditions_are_distinguishable() {
        assert!(ServeError::ServerClosed.is_closed());
        assert!(ServeError::Listener(ListenerError::Closed).is_closed());
        assert!(!ServeError::Other("boom".into()).is_closed());
        let accept = ListenerError::Accept(io::Error::new(io::ErrorKind::Other, "emfile"));
        assert!(!ServeError::Listener(accept).is_closed());
    }
}
