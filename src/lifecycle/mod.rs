//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (supervisor.rs):
//!     Parse endpoint → Bind → Classifier → Servers → Warmup
//!
//! Stop (supervisor.rs):
//!     Fire signal (shutdown.rs) → Wait for barrier (barrier.rs)
//!     → Stop RPC → Stop control plane → Remove socket file
//! ```
//!
//! # Design Decisions
//! - One signal per run, fired once, observed by every background task
//! - The barrier counts exactly the tasks registered for the run
//! - No task is killed; each exits on its own

pub mod barrier;
pub mod shutdown;
pub mod supervisor;

pub use barrier::{BarrierError, ShutdownBarrier};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use supervisor::{
    disposition, exit_process, Component, Disposition, FatalHandler, StopObserver, StopPhase, Supervisor,
};
