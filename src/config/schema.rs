//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::loader::ConfigError;

/// MIME types returned as text in addition to every `text/*` type.
pub const DEFAULT_TEXT_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/javascript",
    "application/xml",
    "application/vnd.api+json",
];

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// HTTP request handling.
    pub http: HttpConfig,

    /// WebSocket event handling.
    pub websocket: WebSocketConfig,

    /// Connection store backend.
    pub store: StoreConfig,

    /// Application startup/shutdown protocol.
    pub lifespan: LifespanConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

/// HTTP request handling.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HttpConfig {
    /// API Gateway stage/base path stripped from incoming paths (e.g. "prod").
    pub base_path: Option<String>,

    /// Extra MIME types whose bodies are returned as text.
    pub text_mime_types: Vec<String>,
}

/// WebSocket event handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Path reported to the application for WebSocket scopes.
    pub app_path: String,

    /// Management API endpoint override (defaults to `https://{domainName}/{stage}`).
    pub management_endpoint: Option<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            app_path: "/".to_string(),
            management_endpoint: None,
        }
    }
}

/// Connection store backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Durable networked store (production).
    #[default]
    Dynamodb,
    /// Single local JSON file (local debugging only).
    File,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Dynamodb => "dynamodb",
            BackendKind::File => "file",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "dynamodb" => Ok(BackendKind::Dynamodb),
            "file" => Ok(BackendKind::File),
            _ => Err(ConfigError::UnknownBackend(tag.to_string())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend selector.
    pub backend: BackendKind,

    /// AWS region of the table (falls back to `AWS_REGION`).
    pub region: Option<String>,

    /// Table holding one item per connection.
    pub table_name: Option<String>,

    /// Endpoint override, e.g. a local DynamoDB.
    pub endpoint: Option<String>,

    /// Path of the JSON file used by the file backend.
    pub file_path: Option<PathBuf>,
}

/// Lifespan protocol settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifespanConfig {
    /// Run the application's startup/shutdown handlers.
    pub enabled: bool,
}

impl Default for LifespanConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}
