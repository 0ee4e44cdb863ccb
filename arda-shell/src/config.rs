//! Configuration loading for the ARDA shell.
//!
//! Endpoints, the persistence buster and the storage medium are required.
//! Query defaults and intervals fall back to library defaults.

use arda_core::{PersistenceConfig, QueryDefaultsConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV: &str = "ARDA_SHELL_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellConfig {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    /// Role whose menu tree is loaded at boot.
    pub default_role: String,
    #[serde(default = "default_initial_path")]
    pub initial_path: String,
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,
    #[serde(default)]
    pub query: QueryDefaultsConfig,
    pub persistence: PersistenceConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    File,
    Lmdb,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub medium: StorageKind,
    /// Directory for the `file` and `lmdb` media.
    pub path: Option<PathBuf>,
    pub map_size_mb: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Plain,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or ARDA_SHELL_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl From<arda_core::ConfigError> for ConfigError {
    fn from(e: arda_core::ConfigError) -> Self {
        match e {
            arda_core::ConfigError::MissingRequired { field } => Self::InvalidValue {
                field,
                reason: "is required".to_string(),
            },
            arda_core::ConfigError::InvalidValue { field, reason } => {
                Self::InvalidValue { field, reason }
            }
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn default_initial_path() -> String {
    "/".to_string()
}

fn default_gc_interval_ms() -> u64 {
    60_000
}

impl ShellConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: ShellConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(invalid("api_base_url", "must not be empty"));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(invalid("api_base_url", "must be an http(s) URL"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if self.default_role.trim().is_empty() {
            return Err(invalid("default_role", "must not be empty"));
        }
        if !self.initial_path.starts_with('/') {
            return Err(invalid("initial_path", "must start with '/'"));
        }
        if self.gc_interval_ms == 0 {
            return Err(invalid("gc_interval_ms", "must be > 0"));
        }
        self.query.validate()?;
        self.persistence.validate()?;

        match self.storage.medium {
            StorageKind::Memory => {}
            StorageKind::File | StorageKind::Lmdb => {
                let missing = self
                    .storage
                    .path
                    .as_ref()
                    .map_or(true, |p| p.as_os_str().is_empty());
                if missing {
                    return Err(invalid("storage.path", "required for file and lmdb media"));
                }
            }
        }
        if self.storage.map_size_mb == Some(0) {
            return Err(invalid("storage.map_size_mb", "must be > 0"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
