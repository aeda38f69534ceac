//! Configuration management for daemon mode
//!
//! Handles TOML configuration parsing and validation

use crate::constants::{
    DEFAULT_CONFIG_PATH, DEFAULT_MAX_QUEUE_LEN, DEFAULT_PROTECTED_ROOT, KEY_SEPARATOR, MAX_QUEUE_LEN_LIMIT,
    SYSTEM_SOCKET_PATH, USER_SOCKET_NAME,
};
use crate::filter::PathFilter;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main daemon configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfiguration {
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub filter: FilterSettings,
}

/// Core daemon runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Control socket path; resolved per user when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    /// Pending record limit (1-65536); the oldest record is evicted beyond it
    pub max_queue_len: usize,
}

/// Protected subtree settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Key path whose subtree is captured
    pub protected_root: String,
    /// Exact comparison; set false to fold case
    pub case_sensitive: bool,
}

/// Configuration validation failures
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Note: bound must match MAX_QUEUE_LEN_LIMIT in constants.rs
    #[error("Invalid max_queue_len: {0}. Must be between 1 and 65536")]
    InvalidQueueLength(usize),

    #[error("Invalid protected_root: {0:?}. Must be a non-empty key path starting with '\\'")]
    InvalidProtectedRoot(String),
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            protected_root: DEFAULT_PROTECTED_ROOT.to_string(),
            case_sensitive: true,
        }
    }
}

impl Default for DaemonConfiguration {
    fn default() -> Self {
        Self {
            daemon: DaemonSettings::default(),
            filter: FilterSettings::default(),
        }
    }
}

impl DaemonConfiguration {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise the default file when present, otherwise defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let default_path = Self::default_config_path()?;
                if default_path.exists() {
                    Self::load_from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Write configuration as TOML, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write configuration file: {}", path.display()))?;
        Ok(())
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let len = self.daemon.max_queue_len;
        if len == 0 || len > MAX_QUEUE_LEN_LIMIT {
            return Err(ConfigError::InvalidQueueLength(len));
        }
        let root = &self.filter.protected_root;
        if root.trim().is_empty() || !root.starts_with(KEY_SEPARATOR) {
            return Err(ConfigError::InvalidProtectedRoot(root.clone()));
        }
        Ok(())
    }

    /// Socket the daemon listens on and clients connect to
    pub fn socket_path(&self) -> PathBuf {
        self.daemon.socket_path.clone().unwrap_or_else(default_socket_path)
    }

    pub fn path_filter(&self) -> PathFilter {
        PathFilter::new(&self.filter.protected_root, self.filter.case_sensitive)
    }

    /// Ensure the socket directory exists
    pub fn ensure_directories(&self) -> Result<()> {
        let socket_path = self.socket_path();
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }
        Ok(())
    }
}

/// System-wide socket when running as root, otherwise a per-user location
pub fn default_socket_path() -> PathBuf {
    if nix::unistd::geteuid().is_root() {
        return PathBuf::from(SYSTEM_SOCKET_PATH);
    }
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(USER_SOCKET_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_is_valid() {
        let config = DaemonConfiguration::default();
        assert_eq!(config.daemon.max_queue_len, 1024);
        assert_eq!(config.filter.protected_root, r"\REGISTRY\MACHINE");
        assert!(config.filter.case_sensitive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_filter_compares_exactly() {
        let filter = DaemonConfiguration::default().path_filter();
        assert!(filter.matches(r"\REGISTRY\MACHINE\SOFTWARE"));
        assert!(!filter.matches(r"\registry\machine\software"));
        assert!(!filter.matches(r"\Registry\Machine"));
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: DaemonConfiguration = toml::from_str("[daemon]\nmax_queue_len = 8\n").unwrap();
        assert_eq!(config.daemon.max_queue_len, 8);
        assert_eq!(config.filter, FilterSettings::default());
        assert!(config.daemon.socket_path.is_none());
    }

    #[test]
    fn test_validation_bounds() {
        let mut config = DaemonConfiguration::default();
        config.daemon.max_queue_len = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidQueueLength(0)));
        config.daemon.max_queue_len = 65_537;
        assert_eq!(config.validate(), Err(ConfigError::InvalidQueueLength(65_537)));
        config.daemon.max_queue_len = 65_536;
        assert!(config.validate().is_ok());

        config.filter.protected_root = "REGISTRY".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidProtectedRoot(_))));
        config.filter.protected_root = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidProtectedRoot(_))));
    }

    #[test]
    fn test_explicit_socket_path_wins() {
        let mut config = DaemonConfiguration::default();
        config.daemon.socket_path = Some(PathBuf::from("/tmp/custom.sock"));
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/custom.sock"));
    }

    #[test]
    fn test_default_socket_name() {
        assert!(default_socket_path().ends_with("regmon.sock"));
    }

    #[test]
    fn test_path_filter_from_settings() {
        let mut config = DaemonConfiguration::default();
        config.filter.protected_root = r"\REGISTRY\MACHINE\SOFTWARE\".to_string();
        config.filter.case_sensitive = false;
        let filter = config.path_filter();
        assert_eq!(filter.root(), r"\REGISTRY\MACHINE\SOFTWARE");
        assert!(!filter.is_case_sensitive());
        assert!(filter.matches(r"\Registry\Machine\Software\Vendor"));
    }
}
