//! Legacy volume-plugin bridge.
//!
//! # Data Flow
//! ```text
//! HTTP/1 + HTTP/2 derived listeners
//!     → server.rs (hyper, trace + request-id layers)
//!     → LegacyBridge::router (legacy API handlers)
//!     → ControlPlane RPCs
//!
//! warmup.rs: LegacyBridge::list every interval until one success
//! ```
//!
//! The bridge's API semantics belong to whoever implements
//! [`LegacyBridge`]; this module only serves and warms it.

pub mod server;
pub mod warmup;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::lifecycle::ShutdownSignal;
use crate::rpc::{ControlPlane, Status};

pub use server::{BridgeServer, HttpProtocol};
pub use warmup::{warm_up, WarmupOutcome};

/// A volume as reported by the legacy API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub status: HashMap<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("control plane: {0}")]
    Rpc(#[from] Status),
    #[error("bridge not ready: {0}")]
    NotReady(String),
}

/// Translates the legacy HTTP API into control-plane calls.
#[async_trait]
pub trait LegacyBridge: Send + Sync + 'static {
    /// List known volumes. Also serves as the readiness probe.
    async fn list(&self) -> Result<Vec<VolumeRecord>, BridgeError>;

    /// Handlers for the legacy API.
    fn router(&self) -> Router;
}

/// Everything a bridge is built from.
pub struct BridgeContext<'a> {
    pub signal: ShutdownSignal,
    pub config: &'a GatewayConfig,
    /// Where the bridge mounts volumes, if configured.
    pub mount_path: Option<PathBuf>,
    pub control_plane: Arc<dyn ControlPlane>,
}

/// Builds the bridge when a multiplexed module starts.
pub type BridgeFactory = Arc<dyn Fn(BridgeContext<'_>) -> Arc<dyn LegacyBridge> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn volume_record_uses_legacy_field_names() {
        let record = VolumeRecord {
            name: "data".into(),
            mountpoint: "/var/lib/volgate/data".into(),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"Name": "data", "Mountpoint": "/var/lib/volgate/data"})
        );

        let parsed: VolumeRecord = serde_json::from_value(json!({"Name": "x"})).unwrap();
        assert_eq!(parsed.name, "x");
        assert!(parsed.status.is_empty());
    }
}
