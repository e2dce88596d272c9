//! Control-plane driver registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::rpc::ControlPlane;

/// Builds a control plane for a module. Receives the module name.
pub type DriverConstructor = Arc<dyn Fn(&str, &GatewayConfig) -> Arc<dyn ControlPlane> + Send + Sync>;

/// Control-plane drivers by name.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, DriverConstructor>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ctor` under `name`, replacing any previous entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn(&str, &GatewayConfig) -> Arc<dyn ControlPlane> + Send + Sync + 'static,
    ) -> &mut Self {
        self.drivers.insert(name.into(), Arc::new(ctor));
        self
    }

    /// Build the named driver, or `None` if it is not registered.
    pub fn create(&self, name: &str, module: &str, config: &GatewayConfig) -> Option<Arc<dyn ControlPlane>> {
        self.drivers.get(name).map(|ctor| ctor(module, config))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry").field("drivers", &self.names()).finish()
    }
}
