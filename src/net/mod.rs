//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! "[proto://]address"
//!     → endpoint.rs (parse, mkdir parent, remove stale socket)
//!     → listener.rs (bind raw unix/TCP listener)
//!     → mux (classification) or straight to the RPC server
//! ```
//!
//! # Design Decisions
//! - Raw and derived listeners share one `Listener` trait
//! - "Closed" is a distinct error, never inferred from message text
//! - Transient accept errors back off instead of ending serve loops

pub mod backoff;
pub mod connection;
pub mod endpoint;
pub mod listener;

pub use connection::ConnectionId;
pub use endpoint::{Endpoint, EndpointError, Protocol};
pub use listener::{accept_with_backoff, BoxIo, Io, Listener, ListenerError, RawListener};
