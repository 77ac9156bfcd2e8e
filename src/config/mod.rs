//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, environment overlay)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!     → passed by value/reference into the bridge, stores and cycles
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a new config means a new bridge
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Unknown backend tags are rejected, never silently ignored

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{from_env, load_config, local_from_env, ConfigError};
pub use schema::{
    BackendKind, BridgeConfig, HttpConfig, LifespanConfig, ObservabilityConfig, StoreConfig,
    WebSocketConfig,
};
