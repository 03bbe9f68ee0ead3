//! Relay Configuration System
//!
//! Provides configuration management for embedders of the Relay FFI runtime:
//! - Global user configuration (~/.relay/config.toml)
//! - Project configuration (relay.toml)
//! - Environment variable overrides (RELAY_*)
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.relay/config.toml)
//! 2. Project config (./relay.toml, searched upwards)
//! 3. Environment variables (RELAY_*)
//!
//! # Example
//!
//! ```no_run
//! use relay_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("release policy: {}", config.release_policy());
//! ```

pub mod loader;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub use loader::{Config, ConfigLoader};
pub use settings::{CallbackSettings, LoggingSettings, ReleasePolicy, RelayConfig};
