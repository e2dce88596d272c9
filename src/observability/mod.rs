//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! setup.rs (host calls init_observability with the gateway config)
//! All subsystems produce:
//!     → logging.rs (tracing events, structured fields)
//!     → line_writer.rs (io::Write diagnostics → one event per line)
//!     → metrics.rs (counters)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through RPC logs
//! - Metrics are cheap (atomic increments)

pub mod line_writer;
pub mod logging;
pub mod metrics;
pub mod setup;

pub use line_writer::{LineSink, LineWriter};
pub use logging::init_logging;
pub use setup::{init_observability, Installed, ObservabilityError};
