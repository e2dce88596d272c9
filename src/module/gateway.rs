//! The gateway module.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::BridgeFactory;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::lifecycle::{FatalHandler, StopObserver, Supervisor};
use crate::module::driver::DriverRegistry;
use crate::module::extensions::Extensions;
use crate::module::{Module, ModuleConfig};
use crate::rpc::RpcLogs;

/// Collaborators shared by every gateway module a host creates.
#[derive(Clone, Default)]
pub struct GatewayDeps {
    pub drivers: Arc<DriverRegistry>,
    pub bridge: Option<BridgeFactory>,
    pub extensions: Option<Extensions>,
    pub logs: Option<RpcLogs>,
    pub fatal: Option<FatalHandler>,
    pub stop_observer: Option<StopObserver>,
}

/// Serves the control-plane RPCs, and the legacy API when multiplexed, on
/// one endpoint.
pub struct GatewayModule {
    name: String,
    description: String,
    address: String,
    extensions: Option<Extensions>,
    supervisor: Supervisor,
}

impl GatewayModule {
    /// Resolve the driver and prepare the module. Nothing is bound yet.
    pub fn new(config: ModuleConfig, deps: &GatewayDeps) -> Result<Self, GatewayError> {
        let address = config.address.trim().to_string();
        if address.is_empty() {
            return Err(GatewayError::MissingAddress);
        }

        let mut gateway = config.gateway;
        gateway.endpoint = Some(address.clone());

        tracing::info!(module = %config.name, driver = %gateway.driver, "Configuring module driver");
        let control_plane = deps
            .drivers
            .create(&gateway.driver, &config.name, &gateway)
            .ok_or_else(|| GatewayError::UnknownDriver(gateway.driver.clone()))?;

        let mut supervisor = Supervisor::new(gateway, control_plane, deps.bridge.clone());
        if let Some(logs) = &deps.logs {
            supervisor = supervisor.with_logs(logs.clone());
        }
        if let Some(fatal) = &deps.fatal {
            supervisor = supervisor.with_fatal_handler(fatal.clone());
        }
        if let Some(observer) = &deps.stop_observer {
            supervisor = supervisor.with_stop_observer(observer.clone());
        }

        Ok(Self {
            name: config.name,
            description: config.description,
            address,
            extensions: deps.extensions.clone(),
            supervisor,
        })
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }
}

#[async_trait]
impl Module for GatewayModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn start(&self) -> Result<(), GatewayError> {
        if let Some(extensions) = &self.extensions {
            extensions.load_once(&self.supervisor.config().extensions);
        }
        self.supervisor.start().await
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.supervisor.stop().await
    }
}

impl std::fmt::Debug for GatewayModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayModule")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// The default module identity, addressed at the config's endpoint.
impl From<&GatewayConfig> for ModuleConfig {
    fn from(gateway: &GatewayConfig) -> Self {
        ModuleConfig {
            name: "default-csi".to_string(),
            description: "The default CSI module.".to_string(),
            address: gateway.endpoint(),
            gateway: gateway.clone(),
        }
    }
}
