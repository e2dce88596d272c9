//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mux::MuxOptions;

/// Socket file name used when no endpoint is configured.
pub const DEFAULT_SOCKET_NAME: &str = "volgate.sock";

/// Root configuration for one gateway module.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address, `[<protocol>://]<address>`. Defaults to the plugin
    /// socket under `home`.
    pub endpoint: Option<String>,

    /// Root for default paths.
    pub home: PathBuf,

    /// Control-plane driver name.
    pub driver: String,

    /// Extensions handed to the extension loader.
    pub extensions: Vec<String>,

    /// Serve only the RPC protocol on the endpoint.
    pub no_legacy_bridge: bool,

    /// Where the bridge mounts volumes.
    pub mount_path: Option<PathBuf>,

    pub mux: MuxConfig,

    pub warmup: WarmupConfig,

    /// Upper bound on waiting for background tasks during stop. Unset
    /// means wait indefinitely.
    pub stop_timeout_secs: Option<u64>,

    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            home: PathBuf::from("/"),
            driver: "libstorage".to_string(),
            extensions: Vec::new(),
            no_legacy_bridge: false,
            mount_path: None,
            mux: MuxConfig::default(),
            warmup: WarmupConfig::default(),
            stop_timeout_secs: None,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// The configured endpoint, or the default socket path.
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(ep) => ep.clone(),
            None => self
                .home
                .join("run/docker/plugins")
                .join(DEFAULT_SOCKET_NAME)
                .to_string_lossy()
                .into_owned(),
        }
    }

    /// Whether the legacy API shares the endpoint.
    pub fn is_multiplexed(&self) -> bool {
        !self.no_legacy_bridge
    }

    pub fn mount_path(&self) -> PathBuf {
        self.mount_path
            .clone()
            .unwrap_or_else(|| self.home.join("var/lib/volgate/csi/volumes"))
    }

    pub fn mux_options(&self) -> MuxOptions {
        MuxOptions {
            sniff_timeout: Duration::from_millis(self.mux.sniff_timeout_ms),
            max_sniff_bytes: self.mux.max_sniff_bytes,
        }
    }

    pub fn warmup_interval(&self) -> Duration {
        Duration::from_millis(self.warmup.interval_ms)
    }

    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_secs.map(Duration::from_secs)
    }
}

/// Connection classifier settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Longest time spent classifying one connection.
    pub sniff_timeout_ms: u64,

    /// Most bytes buffered per connection while classifying.
    pub max_sniff_bytes: usize,

    /// Classified connections queued per derived listener.
    pub queue_size: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            sniff_timeout_ms: 1000,
            max_sniff_bytes: 64 * 1024,
            queue_size: 128,
        }
    }
}

/// Bridge warmup settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WarmupConfig {
    pub interval_ms: u64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.endpoint(), "/run/docker/plugins/volgate.sock");
        assert!(config.is_multiplexed());
        assert_eq!(config.driver, "libstorage");
        assert_eq!(config.mount_path(), PathBuf::from("/var/lib/volgate/csi/volumes"));
        assert_eq!(config.mux_options().sniff_timeout, Duration::from_secs(1));
        assert_eq!(config.warmup_interval(), Duration::from_secs(1));
        assert_eq!(config.stop_timeout(), None);
    }

    #[test]
    fn endpoint_follows_home() {
        let config = GatewayConfig {
            home: PathBuf::from("/opt/volgate"),
            ..Default::default()
        };
        assert_eq!(config.endpoint(), "/opt/volgate/run/docker/plugins/volgate.sock");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            endpoint = "tcp://127.0.0.1:7979"
            no_legacy_bridge = true

            [mux]
            queue_size = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint(), "tcp://127.0.0.1:7979");
        assert!(!config.is_multiplexed());
        assert_eq!(config.mux.queue_size, 4);
        assert_eq!(config.mux.max_sniff_bytes, 64 * 1024);
    }
}
