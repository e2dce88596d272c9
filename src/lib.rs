//! Single-socket storage gateway.
//!
//! One endpoint carries both the control-plane RPC protocol and the legacy
//! volume-plugin HTTP API. Connections are classified by their first bytes
//! and handed to the matching server.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌────────────────────────────────────────────────────┐
//!                     │                      GATEWAY                       │
//!                     │                                                    │
//!   unix/tcp socket   │  ┌─────────┐    ┌────────────┐   grpc  ┌────────┐  │
//!   ──────────────────┼─▶│   net   │───▶│    mux     │────────▶│  rpc   │──┼──▶ ControlPlane
//!                     │  │listener │    │ classifier │         │ server │  │
//!                     │  └─────────┘    └─────┬──────┘         └────────┘  │
//!                     │                 http1 │ http2                      │
//!                     │                       ▼                            │
//!                     │                 ┌────────────┐                     │
//!                     │                 │   bridge   │─────────────────────┼──▶ LegacyBridge
//!                     │                 │  servers   │                     │
//!                     │                 └────────────┘                     │
//!                     │                                                    │
//!                     │  lifecycle: Supervisor · Shutdown · Barrier        │
//!                     │  module:    Module · ModuleRegistry · Drivers      │
//!                     └────────────────────────────────────────────────────┘
//! ```
//!
//! With the legacy bridge disabled the RPC server accepts on the raw
//! listener directly and no classifier runs.
//!
//! The host owns process-wide state: it calls [`init_observability`] once
//! with the loaded [`GatewayConfig`], then registers and starts modules.

pub mod bridge;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod module;
pub mod mux;
pub mod net;
pub mod observability;
pub mod rpc;

pub use config::GatewayConfig;
pub use error::{GatewayError, ServeError};
pub use lifecycle::{Shutdown, ShutdownSignal, Supervisor};
pub use observability::init_observability;
pub use module::{register_gateway_modules, GatewayDeps, GatewayModule, Module, ModuleConfig, ModuleRegistry};
