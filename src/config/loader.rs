//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{BackendKind, BridgeConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
    UnknownBackend(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::UnknownBackend(tag) => write!(f, "Invalid backend specified: {}", tag),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config: BridgeConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    config.apply_env()?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// File name of the connection store used by local runs.
pub const LOCAL_STORE_FILE: &str = "asgi-bridge-connections.json";

/// Defaults plus environment overrides, validated.
pub fn from_env() -> Result<BridgeConfig, ConfigError> {
    overlay_env(BridgeConfig::default())
}

/// Like [`from_env`], but storing connections in a file under the temp
/// directory unless `BRIDGE_STORE_*` says otherwise.
pub fn local_from_env() -> Result<BridgeConfig, ConfigError> {
    overlay_env(local_defaults())
}

fn overlay_env(mut config: BridgeConfig) -> Result<BridgeConfig, ConfigError> {
    config.apply_env()?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn local_defaults() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.store.backend = BackendKind::File;
    config.store.file_path = Some(std::env::temp_dir().join(LOCAL_STORE_FILE));
    config
}

impl BridgeConfig {
    /// Overlay process environment variables.
    ///
    /// `AWS_REGION` only fills a missing region; the `BRIDGE_*` variables
    /// always win over file values.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(tag) = var("BRIDGE_STORE_BACKEND") {
            self.store.backend = tag.parse::<BackendKind>()?;
        }
        if let Some(table) = var("BRIDGE_STORE_TABLE") {
            self.store.table_name = Some(table);
        }
        if let Some(endpoint) = var("BRIDGE_STORE_ENDPOINT") {
            self.store.endpoint = Some(endpoint);
        }
        if let Some(path) = var("BRIDGE_STORE_FILE") {
            self.store.file_path = Some(path.into());
        }
        if self.store.region.is_none() {
            self.store.region = var("AWS_REGION");
        }
        if let Some(level) = var("BRIDGE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        Ok(())
    }
}
