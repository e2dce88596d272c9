//! HTTP server for the legacy API.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::server::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::error::ServeError;
use crate::net::{accept_with_backoff, ConnectionId, Listener};

/// How long open connections get to finish once the listener closes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire protocol a [`BridgeServer`] speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpProtocol {
    Http1,
    Http2,
}

impl HttpProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpProtocol::Http1 => "http1",
            HttpProtocol::Http2 => "http2",
        }
    }
}

/// Serves a legacy-API router on one listener.
pub struct BridgeServer {
    router: Router,
    protocol: HttpProtocol,
}

impl BridgeServer {
    /// Wrap `router` with request tracing and request IDs.
    pub fn new(router: Router, protocol: HttpProtocol) -> Self {
        let router = router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));
        Self { router, protocol }
    }

    pub fn protocol(&self) -> HttpProtocol {
        self.protocol
    }

    /// Serve until the listener closes or fails.
    ///
    /// Always returns an error; a closed listener
    /// ([`ServeError::is_closed`]) is the planned-shutdown case. Open
    /// connections are drained before returning.
    pub async fn serve(self, listener: Arc<dyn Listener>) -> Result<(), ServeError> {
        let graceful = GracefulShutdown::new();
        let mut attempts = 0;

        tracing::info!(
            listener = %listener.describe(),
            protocol = self.protocol.as_str(),
            "Bridge server serving"
        );

        let err = loop {
            let io = match accept_with_backoff(&*listener, &mut attempts).await {
                Ok(io) => TokioIo::new(io),
                Err(e) => break ServeError::from(e),
            };
            let id = ConnectionId::new();
            let service = TowerToHyperService::new(self.router.clone());

            match self.protocol {
                HttpProtocol::Http1 => {
                    let conn = http1::Builder::new().serve_connection(io, service);
                    let watched = graceful.watch(conn);
                    tokio::spawn(async move {
                        if let Err(e) = watched.await {
                            tracing::debug!(connection_id = %id, error = %e, "Bridge connection error");
                        }
                    });
                }
                HttpProtocol::Http2 => {
                    let conn = http2::Builder::new(TokioExecutor::new()).serve_connection(io, service);
                    let watched = graceful.watch(conn);
                    tokio::spawn(async move {
                        if let Err(e) = watched.await {
                            tracing::debug!(connection_id = %id, error = %e, "Bridge connection error");
                        }
                    });
                }
            }
        };

        if tokio::time::timeout(DRAIN_TIMEOUT, graceful.shutdown()).await.is_err() {
            tracing::warn!(protocol = self.protocol.as_str(), "Bridge connections did not drain in time");
        }
        Err(err)
    }
}
