//! Connection state store.
//!
//! # Responsibilities
//! - Persist a connection's scope at CONNECT, keyed by connection id
//! - Restore it on every MESSAGE, remove it at DISCONNECT
//! - Map medium failures onto the store error taxonomy
//!
//! # Data Flow
//! ```text
//! ConnectionScope ──to_json──▶ scope text ──▶ backend (DynamoDB item | JSON file entry)
//! ConnectionScope ◀─from_json── scope text ◀──┘
//! ```
//!
//! # Design Decisions
//! - Backends form a closed set chosen once from `StoreConfig`; never per call
//! - `create` is a conditional write: existing entries are never overwritten
//! - `delete` is idempotent
//! - Nothing is cached between invocations

pub mod dynamodb;
pub mod file;

use thiserror::Error;

use crate::aws::Credentials;
use crate::config::{BackendKind, StoreConfig};
use crate::observability::metrics;
use crate::protocol::scope::ConnectionScope;

pub use dynamodb::DynamoDbStore;
pub use file::FileStore;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// `create` found an existing entry for the id.
    #[error("connection already exists: {0}")]
    DuplicateConnection(String),

    /// `fetch` found no entry for the id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// The medium could not be reached or refused the request.
    #[error("store backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Missing/invalid parameters or a target that does not exist.
    #[error("store configuration error: {0}")]
    Configuration(String),

    /// An entry exists but cannot be decoded.
    #[error("stored scope for {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    /// Only configuration problems should stop the bridge from serving.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Configuration(_))
    }

    fn outcome(&self) -> &'static str {
        match self {
            StoreError::DuplicateConnection(_) => "duplicate",
            StoreError::ConnectionNotFound(_) => "not_found",
            StoreError::BackendUnavailable(_) => "unavailable",
            StoreError::Configuration(_) => "configuration",
            StoreError::Corrupt { .. } => "corrupt",
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A connection store backend.
#[derive(Debug)]
pub enum ConnectionStore {
    DynamoDb(DynamoDbStore),
    File(FileStore),
}

impl ConnectionStore {
    /// Build the backend selected by `config`.
    ///
    /// The DynamoDB backend verifies its table exists before returning.
    /// Credentials default to the runtime environment.
    pub async fn open(config: &StoreConfig, credentials: Option<Credentials>) -> StoreResult<Self> {
        match config.backend {
            BackendKind::Dynamodb => {
                let credentials = match credentials {
                    Some(credentials) => credentials,
                    None => Credentials::from_env()
                        .map_err(|e| StoreError::Configuration(e.to_string()))?,
                };
                Ok(ConnectionStore::DynamoDb(
                    DynamoDbStore::connect(config, credentials).await?,
                ))
            }
            BackendKind::File => Ok(ConnectionStore::File(FileStore::open(config)?)),
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            ConnectionStore::DynamoDb(_) => BackendKind::Dynamodb,
            ConnectionStore::File(_) => BackendKind::File,
        }
    }

    /// Persist `scope` for `id`; fails if an entry already exists.
    pub async fn create(&self, id: &str, scope: &ConnectionScope) -> StoreResult<()> {
        let text = scope.to_json().map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        let result = match self {
            ConnectionStore::DynamoDb(store) => store.create(id, &text).await,
            ConnectionStore::File(store) => store.create(id, &text).await,
        };
        self.record("create", id, &result);
        result
    }

    /// Restore the scope stored for `id`.
    pub async fn fetch(&self, id: &str) -> StoreResult<ConnectionScope> {
        let result = match self {
            ConnectionStore::DynamoDb(store) => store.fetch(id).await,
            ConnectionStore::File(store) => store.fetch(id).await,
        }
        .and_then(|text| {
            ConnectionScope::from_json(&text).map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })
        });
        self.record("fetch", id, &result);
        result
    }

    /// Remove the entry for `id`, present or not.
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let result = match self {
            ConnectionStore::DynamoDb(store) => store.delete(id).await,
            ConnectionStore::File(store) => store.delete(id).await,
        };
        self.record("delete", id, &result);
        result
    }

    fn record<T>(&self, op: &'static str, id: &str, result: &StoreResult<T>) {
        let backend = self.backend().as_str();
        match result {
            Ok(_) => {
                tracing::debug!(connection_id = %id, backend, op, "Store operation succeeded");
                metrics::record_store_operation(backend, op, "ok");
            }
            Err(err) => {
                tracing::debug!(connection_id = %id, backend, op, error = %err, "Store operation failed");
                metrics::record_store_operation(backend, op, err.outcome());
            }
        }
    }
}
