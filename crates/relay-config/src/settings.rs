//! Configuration file schema
//!
//! The same schema is used for the global file (`~/.relay/config.toml`) and
//! for project files (`relay.toml`):
//!
//! ```toml
//! [callbacks]
//! release_policy = "retain"
//! sweep_interval = 64
//!
//! [logging]
//! filter = "relay_runtime=debug"
//! ```

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default number of cache insertions between sweeps of dead callables
pub const DEFAULT_SWEEP_INTERVAL: usize = 64;

/// Default tracing filter directive
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// What happens to a trampoline's native code once nothing on the host side
/// references it any more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReleasePolicy {
    /// Never free native code. Late call-ins return the neutral value.
    #[default]
    Retain,
    /// Free native code when the last host reference drops.
    Release,
}

impl ReleasePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleasePolicy::Retain => "retain",
            ReleasePolicy::Release => "release",
        }
    }
}

impl fmt::Display for ReleasePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleasePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retain" => Ok(ReleasePolicy::Retain),
            "release" => Ok(ReleasePolicy::Release),
            other => Err(ConfigError::InvalidValue {
                field: "callbacks.release_policy".to_string(),
                reason: format!("must be 'retain' or 'release', got '{}'", other),
            }),
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Callback trampoline settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callbacks: Option<CallbackSettings>,

    /// Logging settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSettings>,
}

/// `[callbacks]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CallbackSettings {
    /// Release policy for unreachable trampolines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_policy: Option<ReleasePolicy>,

    /// Cache insertions between automatic sweeps (must be > 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<usize>,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl RelayConfig {
    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges that serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(callbacks) = &self.callbacks {
            if callbacks.sweep_interval == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "callbacks.sweep_interval".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if let Some(logging) = &self.logging {
            if let Some(filter) = &logging.filter {
                if filter.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "logging.filter".to_string(),
                        reason: "must not be empty".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Merge another config into this one.
    /// Other config takes precedence for non-None values, field by field.
    pub fn merge(&mut self, other: &RelayConfig) {
        if let Some(theirs) = &other.callbacks {
            let ours = self.callbacks.get_or_insert_with(Default::default);
            if theirs.release_policy.is_some() {
                ours.release_policy = theirs.release_policy;
            }
            if theirs.sweep_interval.is_some() {
                ours.sweep_interval = theirs.sweep_interval;
            }
        }
        if let Some(theirs) = &other.logging {
            let ours = self.logging.get_or_insert_with(Default::default);
            if theirs.filter.is_some() {
                ours.filter = theirs.filter.clone();
            }
        }
    }

    pub fn release_policy(&self) -> Option<ReleasePolicy> {
        self.callbacks.as_ref().and_then(|c| c.release_policy)
    }

    pub fn sweep_interval(&self) -> Option<usize> {
        self.callbacks.as_ref().and_then(|c| c.sweep_interval)
    }

    pub fn log_filter(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.filter.as_deref())
    }
}
