//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the selected store backend has its location parameters
//! - Validate value formats (MIME types, log levels, paths)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::{BackendKind, BridgeConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.store.backend {
        BackendKind::Dynamodb => {
            if config.store.table_name.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new(
                    "store.table_name",
                    "required for the dynamodb backend",
                ));
            }
            if config.store.region.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new(
                    "store.region",
                    "required for the dynamodb backend (or set AWS_REGION)",
                ));
            }
            if let Some(endpoint) = &config.store.endpoint {
                if url::Url::parse(endpoint).is_err() {
                    errors.push(ValidationError::new(
                        "store.endpoint",
                        format!("not a valid URL: {}", endpoint),
                    ));
                }
            }
        }
        BackendKind::File => {
            if config.store.file_path.is_none() {
                errors.push(ValidationError::new(
                    "store.file_path",
                    "required for the file backend",
                ));
            }
        }
    }

    if let Some(endpoint) = &config.websocket.management_endpoint {
        if url::Url::parse(endpoint).is_err() {
            errors.push(ValidationError::new(
                "websocket.management_endpoint",
                format!("not a valid URL: {}", endpoint),
            ));
        }
    }

    if !config.websocket.app_path.starts_with('/') {
        errors.push(ValidationError::new(
            "websocket.app_path",
            "must start with '/'",
        ));
    }

    if let Some(base_path) = &config.http.base_path {
        if base_path.trim_matches('/').is_empty() {
            errors.push(ValidationError::new("http.base_path", "must not be empty"));
        }
    }

    for mime in &config.http.text_mime_types {
        let valid = mime
            .split_once('/')
            .map_or(false, |(kind, sub)| !kind.is_empty() && !sub.is_empty());
        if !valid {
            errors.push(ValidationError::new(
                "http.text_mime_types",
                format!("'{}' is not a type/subtype MIME type", mime),
            ));
        }
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamodb_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.store.region = Some("us-east-1".into());
        config.store.table_name = Some("connections".into());
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&dynamodb_config()).is_ok());
    }

    #[test]
    fn test_dynamodb_requires_table_and_region() {
        let errors = validate_config(&BridgeConfig::default()).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["store.table_name", "store.region"]);
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = dynamodb_config();
        config.websocket.app_path = "ws".into();
        config.http.text_mime_types = vec!["json".into()];
        config.observability.log_level = "loud".into();
        config.store.endpoint = Some("not a url".into());

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_file_backend_needs_path() {
        let mut config = BridgeConfig::default();
        config.store.backend = BackendKind::File;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "store.file_path");

        config.store.file_path = Some("/tmp/conns.json".into());
        assert!(validate_config(&config).is_ok());
    }
}
