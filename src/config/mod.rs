//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (CSI_ENDPOINT, X_CSI_* environment overrides)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, from_toml_str, load_config, ConfigError};
pub use schema::{GatewayConfig, MuxConfig, ObservabilityConfig, WarmupConfig};
pub use validation::{validate_config, ValidationError};
