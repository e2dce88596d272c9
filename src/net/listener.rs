//! Listener abstraction and the raw socket listener.
//!
//! # Responsibilities
//! - Bind the one raw socket (unix or TCP)
//! - Present raw and derived listeners behind one trait
//! - Report "closed" distinctly from real accept failures
//! - Retry transient accept errors with backoff

use std::io;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

use crate::lifecycle::Shutdown;
use crate::net::backoff::{
    calculate_backoff, is_transient_accept_error, ACCEPT_BASE_DELAY_MS, ACCEPT_MAX_DELAY_MS,
};
use crate::net::endpoint::{Endpoint, Protocol};

/// Byte stream accepted from any listener.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased accepted connection.
pub type BoxIo = Box<dyn Io>;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The listener was closed; expected during shutdown.
    #[error("listener closed")]
    Closed,
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    Bind(#[source] io::Error),
    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),
}

impl ListenerError {
    /// Whether this error only means the listener was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, ListenerError::Closed)
    }
}

/// Anything servers can accept connections from.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Wait for the next connection.
    async fn accept(&self) -> Result<BoxIo, ListenerError>;

    /// Close the listener. Pending and future accepts return
    /// [`ListenerError::Closed`]. Closing twice is a no-op.
    fn close(&self);

    /// Whether [`Listener::close`] has been called.
    fn is_closed(&self) -> bool;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

enum Socket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// The single OS-level listener the gateway owns.
pub struct RawListener {
    socket: Socket,
    endpoint: Endpoint,
    closed: Shutdown,
}

impl RawListener {
    /// Bind to a prepared endpoint.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, ListenerError> {
        let socket = match endpoint.protocol() {
            #[cfg(unix)]
            Protocol::Unix => Socket::Unix(UnixListener::bind(endpoint.address()).map_err(ListenerError::Bind)?),
            #[cfg(not(unix))]
            Protocol::Unix => {
                return Err(ListenerError::Bind(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix sockets are not supported on this platform",
                )))
            }
            Protocol::Tcp => Socket::Tcp(
                TcpListener::bind(endpoint.address())
                    .await
                    .map_err(ListenerError::Bind)?,
            ),
            Protocol::Tcp4 | Protocol::Tcp6 => {
                let want_v4 = endpoint.protocol() == Protocol::Tcp4;
                let addr = tokio::net::lookup_host(endpoint.address())
                    .await
                    .map_err(ListenerError::Bind)?
                    .find(|a| a.is_ipv4() == want_v4)
                    .ok_or_else(|| {
                        ListenerError::Bind(io::Error::new(
                            io::ErrorKind::AddrNotAvailable,
                            format!("no {} address for {}", endpoint.protocol().as_str(), endpoint.address()),
                        ))
                    })?;
                Socket::Tcp(TcpListener::bind(addr).await.map_err(ListenerError::Bind)?)
            }
        };

        let listener = Self {
            socket,
            endpoint: endpoint.clone(),
            closed: Shutdown::new(),
        };

        tracing::info!(address = %listener.local_addr(), "Listener bound");
        Ok(listener)
    }

    /// The endpoint this listener was bound from.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The bound address, with the kernel-assigned port for `:0` TCP binds.
    pub fn local_addr(&self) -> String {
        match &self.socket {
            Socket::Tcp(l) => l
                .local_addr()
                .map(|a| format!("tcp://{a}"))
                .unwrap_or_else(|_| self.endpoint.to_string()),
            #[cfg(unix)]
            Socket::Unix(_) => self.endpoint.to_string(),
        }
    }

    async fn accept_socket(&self) -> io::Result<BoxIo> {
        match &self.socket {
            Socket::Tcp(l) => {
                let (stream, peer) = l.accept().await?;
                let _ = stream.set_nodelay(true);
                tracing::trace!(peer_addr = %peer, "Connection accepted");
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Socket::Unix(l) => {
                let (stream, _) = l.accept().await?;
                tracing::trace!(address = %self.endpoint, "Connection accepted");
                Ok(Box::new(stream))
            }
        }
    }
}

#[async_trait]
impl Listener for RawListener {
    async fn accept(&self) -> Result<BoxIo, ListenerError> {
        let mut closed = self.closed.subscribe();
        if closed.is_triggered() {
            return Err(ListenerError::Closed);
        }

        tokio::select! {
            biased;
            _ = closed.recv() => Err(ListenerError::Closed),
            res = self.accept_socket() => res.map_err(ListenerError::Accept),
        }
    }

    fn close(&self) {
        if self.closed.trigger() {
            tracing::debug!(address = %self.endpoint, "Listener closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_triggered()
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

/// Accept from `listener`, sleeping through transient failures.
///
/// `attempts` carries the consecutive-failure count between calls so a serve
/// loop backs off progressively; it is reset on success.
pub async fn accept_with_backoff(
    listener: &dyn Listener,
    attempts: &mut u32,
) -> Result<BoxIo, ListenerError> {
    loop {
        match listener.accept().await {
            Ok(io) => {
                *attempts = 0;
                return Ok(io);
            }
            Err(ListenerError::Accept(e)) if is_transient_accept_error(&e) => {
                *attempts = attempts.saturating_add(1);
                let delay = calculate_backoff(*attempts, ACCEPT_BASE_DELAY_MS, ACCEPT_MAX_DELAY_MS);
                tracing::warn!(
                    listener = %listener.describe(),
                    error = %e,
                    retry_in = ?delay,
                    "Transient accept error"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
