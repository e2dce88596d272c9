//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Overrides the endpoint.
pub const ENV_ENDPOINT: &str = "CSI_ENDPOINT";
/// Overrides the control-plane driver.
pub const ENV_DRIVER: &str = "X_CSI_DRIVER";
/// Extension names, separated by commas or whitespace.
pub const ENV_EXTENSIONS: &str = "X_CSI_GO_PLUGINS";
/// Disables the legacy bridge when truthy.
pub const ENV_NO_LEGACY_BRIDGE: &str = "X_CSI_NO_DOCKER";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file, apply environment overrides, and validate.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    from_toml_str(&content, |key| std::env::var(key).ok())
}

/// Parse `content`, apply overrides from `env`, and validate.
pub fn from_toml_str(
    content: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<GatewayConfig, ConfigError> {
    let mut config: GatewayConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, env);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply environment overrides in place. Empty values are ignored.
pub fn apply_env_overrides(config: &mut GatewayConfig, env: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(endpoint) = get(ENV_ENDPOINT) {
        config.endpoint = Some(endpoint);
    }
    if let Some(driver) = get(ENV_DRIVER) {
        config.driver = driver;
    }
    if let Some(list) = get(ENV_EXTENSIONS) {
        config.extensions = list
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(flag) = get(ENV_NO_LEGACY_BRIDGE) {
        config.no_legacy_bridge = parse_bool(&flag);
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
