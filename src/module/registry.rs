//! Module constructors by kind.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::module::gateway::{GatewayDeps, GatewayModule};
use crate::module::{Module, ModuleConfig};

/// Builds a module from its configuration.
pub type ModuleConstructor =
    Arc<dyn Fn(ModuleConfig) -> Result<Box<dyn Module>, GatewayError> + Send + Sync>;

/// Kinds the gateway module registers under.
pub const GATEWAY_KINDS: [&str; 2] = ["csi", "docker"];

/// Explicitly populated map from module kind to constructor.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    constructors: HashMap<String, ModuleConstructor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ctor` under `kind`, replacing any previous entry.
    pub fn register(&mut self, kind: impl Into<String>, ctor: ModuleConstructor) -> &mut Self {
        self.constructors.insert(kind.into(), ctor);
        self
    }

    pub fn create(&self, kind: &str, config: ModuleConfig) -> Result<Box<dyn Module>, GatewayError> {
        let ctor = self
            .constructors
            .get(kind)
            .ok_or_else(|| GatewayError::UnknownModule(kind.to_string()))?;
        ctor(config)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Register the gateway module under every kind in [`GATEWAY_KINDS`].
///
/// The kinds share `deps`, including its extension guard.
pub fn register_gateway_modules(registry: &mut ModuleRegistry, deps: GatewayDeps) {
    let deps = Arc::new(deps);
    let ctor: ModuleConstructor = Arc::new(move |config: ModuleConfig| -> Result<Box<dyn Module>, GatewayError> {
        let module = GatewayModule::new(config, &deps)?;
        Ok(Box::new(module) as Box<dyn Module>)
    });
    for kind in GATEWAY_KINDS {
        registry.register(kind, ctor.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Named(ModuleConfig);

    #[async_trait]
    impl Module for Named {
        fn name(&self) -> &str {
            &self.0.name
        }
        fn description(&self) -> &str {
            &self.0.description
        }
        fn address(&self) -> &str {
            &self.0.address
        }
        async fn start(&self) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn config(name: &str) -> ModuleConfig {
        ModuleConfig {
            name: name.into(),
            description: String::new(),
            address: "/run/test.sock".into(),
            gateway: Default::default(),
        }
    }

    #[test]
    fn create_uses_registered_constructor() {
        let mut registry = ModuleRegistry::new();
        let ctor: ModuleConstructor = Arc::new(|config: ModuleConfig| -> Result<Box<dyn Module>, GatewayError> {
            Ok(Box::new(Named(config)))
        });
        registry.register("stub", ctor);

        let module = registry.create("stub", config("one")).ok().unwrap();
        assert_eq!(module.name(), "one");
        assert!(registry.contains("stub"));
        assert!(matches!(
            registry.create("missing", config("two")),
            Err(GatewayError::UnknownModule(ref k)) if k == "missing"
        ));
    }

    #[test]
    fn gateway_kinds_share_one_constructor() {
        let mut registry = ModuleRegistry::new();
        register_gateway_modules(&mut registry, GatewayDeps::default());
        assert_eq!(registry.kinds(), GATEWAY_KINDS.to_vec());

        // No drivers are registered, so construction fails for both kinds.
        for kind in GATEWAY_KINDS {
            assert!(matches!(
                registry.create(kind, config("default-csi")),
                Err(GatewayError::UnknownDriver(_))
            ));
        }
    }
}
