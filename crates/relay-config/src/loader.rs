//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::settings::{RelayConfig, ReleasePolicy, DEFAULT_LOG_FILTER, DEFAULT_SWEEP_INTERVAL};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file name
pub const PROJECT_FILE: &str = "relay.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.relay/config.toml) - lowest priority
/// 2. Project config (./relay.toml) - overrides global
/// 3. Environment variables (RELAY_*) - overrides project
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Effective (merged) settings
    pub settings: RelayConfig,

    /// Directory where relay.toml was found
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Create a loader that reads the global config from an explicit path
    pub fn with_global_path(path: PathBuf) -> Self {
        Self {
            global_config_path: Some(path),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find relay.toml, then merges it over
    /// the global config and applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project) = self.find_project_config(start_dir)?;

        let mut settings = self.load_global_config()?;
        settings.merge(&project);
        let settings = self.apply_env_overrides(settings)?;

        Ok(Config {
            settings,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project = RelayConfig::load_from_file(config_path)?;

        let mut settings = self.load_global_config()?;
        settings.merge(&project);
        let settings = self.apply_env_overrides(settings)?;

        Ok(Config {
            settings,
            project_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, RelayConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let config = RelayConfig::load_from_file(&config_path)?;
                return Ok((Some(current), config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, RelayConfig::default())),
            }
        }
    }

    /// Load global configuration from ~/.relay/config.toml
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    fn load_global_config(&mut self) -> ConfigResult<RelayConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => {
                let dir = match Self::global_config_dir() {
                    Ok(dir) => dir,
                    Err(ConfigError::HomeNotFound) => return Ok(RelayConfig::default()),
                    Err(e) => return Err(e),
                };
                let path = dir.join("config.toml");
                self.global_config_path = Some(path.clone());
                path
            }
        };

        // Global config is optional
        if !path.exists() {
            return Ok(RelayConfig::default());
        }

        RelayConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides
    ///
    /// - RELAY_RELEASE_POLICY=retain|release
    /// - RELAY_SWEEP_INTERVAL=<n>
    /// - RELAY_LOG=<filter>
    fn apply_env_overrides(&self, mut config: RelayConfig) -> ConfigResult<RelayConfig> {
        if let Ok(policy) = env::var("RELAY_RELEASE_POLICY") {
            let policy: ReleasePolicy = policy.parse()?;
            config
                .callbacks
                .get_or_insert_with(Default::default)
                .release_policy = Some(policy);
        }

        if let Ok(interval) = env::var("RELAY_SWEEP_INTERVAL") {
            let interval = interval
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "RELAY_SWEEP_INTERVAL".to_string(),
                    reason: e.to_string(),
                })?;
            config
                .callbacks
                .get_or_insert_with(Default::default)
                .sweep_interval = Some(interval);
        }

        if let Ok(filter) = env::var("RELAY_LOG") {
            config.logging.get_or_insert_with(Default::default).filter = Some(filter);
        }

        config.validate()?;
        Ok(config)
    }

    /// Get the global configuration directory (~/.relay)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".relay"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Effective release policy (env > project > global > default)
    pub fn release_policy(&self) -> ReleasePolicy {
        self.settings.release_policy().unwrap_or_default()
    }

    /// Effective sweep interval
    pub fn sweep_interval(&self) -> usize {
        self.settings
            .sweep_interval()
            .unwrap_or(DEFAULT_SWEEP_INTERVAL)
    }

    /// Effective tracing filter
    pub fn log_filter(&self) -> &str {
        self.settings.log_filter().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn isolated_loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::with_global_path(dir.path().join("no-global.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(PROJECT_FILE),
            "[callbacks]\nrelease_policy = \"release\"\n",
        )
        .unwrap();

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.release_policy(), ReleasePolicy::Release);
        assert_eq!(config.project_root(), Some(temp_dir.path()));
    }

    #[test]
    #[serial]
    fn test_defaults_without_files() {
        let temp_dir = TempDir::new().unwrap();

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.release_policy(), ReleasePolicy::Retain);
        assert_eq!(config.sweep_interval(), DEFAULT_SWEEP_INTERVAL);
        assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
        assert!(config.project_root().is_none());
    }

    #[test]
    #[serial]
    fn test_env_override_policy() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(PROJECT_FILE),
            "[callbacks]\nrelease_policy = \"retain\"\n",
        )
        .unwrap();

        env::set_var("RELAY_RELEASE_POLICY", "release");
        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path());
        env::remove_var("RELAY_RELEASE_POLICY");

        assert_eq!(config.unwrap().release_policy(), ReleasePolicy::Release);
    }

    #[test]
    #[serial]
    fn test_malformed_global_config_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global.toml");
        fs::write(&global, "[callbacks]\nrelease_policy = \"sometimes\"\n").unwrap();

        let mut loader = ConfigLoader::with_global_path(global.clone());
        let result = loader.load_from_directory(temp_dir.path());
        assert!(matches!(
            result,
            Err(ConfigError::TomlParseError { ref file, .. }) if *file == global
        ));
    }

    #[test]
    #[serial]
    fn test_invalid_global_value_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global.toml");
        fs::write(&global, "[callbacks]\nsweep_interval = 0\n").unwrap();

        let mut loader = ConfigLoader::with_global_path(global);
        let result = loader.load_from_directory(temp_dir.path());
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_interval() {
        let temp_dir = TempDir::new().unwrap();

        env::set_var("RELAY_SWEEP_INTERVAL", "often");
        let mut loader = isolated_loader(&temp_dir);
        let result = loader.load_from_directory(temp_dir.path());
        env::remove_var("RELAY_SWEEP_INTERVAL");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
