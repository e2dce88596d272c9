//! Module facade exposed to the embedding host.
//!
//! # Data Flow
//! ```text
//! host startup
//!     → register_gateway_modules (explicit, "csi" + "docker")
//!     → ModuleRegistry::create(kind, ModuleConfig)
//!     → GatewayModule::new (address check, driver lookup)
//!     → Module::start / Module::stop (Supervisor)
//! ```

pub mod driver;
pub mod extensions;
pub mod gateway;
pub mod registry;

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::error::GatewayError;

pub use driver::{DriverConstructor, DriverRegistry};
pub use extensions::{ExtensionLoader, Extensions};
pub use gateway::{GatewayDeps, GatewayModule};
pub use registry::{register_gateway_modules, ModuleConstructor, ModuleRegistry, GATEWAY_KINDS};

/// Identity and settings the host assigns to a module instance.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub name: String,
    pub description: String,
    /// Endpoint address; surrounding whitespace is ignored.
    pub address: String,
    pub gateway: GatewayConfig,
}

/// A unit of work the host starts and stops.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn address(&self) -> &str;

    /// Start serving. Errors mean the module never became ready.
    async fn start(&self) -> Result<(), GatewayError>;

    /// Stop serving. Safe to call more than once.
    async fn stop(&self) -> Result<(), GatewayError>;
}
