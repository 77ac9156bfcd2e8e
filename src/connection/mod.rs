//! Connection facade over the store and the relay transport.
//!
//! # States
//! - Absent: no scope stored for the id
//! - Open: a scope is stored; MESSAGE invocations may resume it
//!
//! # State Transitions
//! ```text
//! Absent → Open:   establish (CONNECT)
//! Open → Open:     resume (MESSAGE)
//! Open → Absent:   terminate (DISCONNECT) or relay reports the client gone
//! Absent → Absent: terminate (idempotent)
//! ```
//!
//! # Design Decisions
//! - The store is the only source of truth; the local state records what
//!   this invocation last observed
//! - A client that is gone is cleaned up here, never surfaced to the application

pub mod relay;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use thiserror::Error;

use crate::observability::metrics;
use crate::protocol::scope::ConnectionScope;
use crate::store::{ConnectionStore, StoreError};

pub use relay::{ManagementApiClient, RelayError, RelayTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Absent,
    Open,
}

/// Outcome of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The client had disconnected; its stored scope has been removed.
    PeerGone,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("no relay transport configured for connection")]
    NoRelay,
}

impl ConnectionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectionError::Store(err) if err.is_fatal())
    }
}

/// One WebSocket connection, as seen by a single invocation.
pub struct Connection {
    id: String,
    store: ConnectionStore,
    relay: Option<Arc<dyn RelayTransport>>,
    state: Option<ConnectionState>,
}

impl Connection {
    pub fn new(id: impl Into<String>, store: ConnectionStore) -> Self {
        Self {
            id: id.into(),
            store,
            relay: None,
            state: None,
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn RelayTransport>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Last state observed in the store, `None` before any operation.
    pub fn state(&self) -> Option<ConnectionState> {
        self.state
    }

    pub fn store(&self) -> &ConnectionStore {
        &self.store
    }

    /// Persist the scope of a new connection (Absent → Open).
    pub async fn establish(&mut self, scope: &ConnectionScope) -> Result<(), ConnectionError> {
        self.store.create(&self.id, scope).await?;
        self.state = Some(ConnectionState::Open);
        tracing::info!(connection_id = %self.id, path = %scope.path, "Connection established");
        Ok(())
    }

    /// Restore the scope stored at CONNECT.
    pub async fn resume(&mut self) -> Result<ConnectionScope, ConnectionError> {
        match self.store.fetch(&self.id).await {
            Ok(scope) => {
                self.state = Some(ConnectionState::Open);
                Ok(scope)
            }
            Err(err) => {
                if matches!(err, StoreError::ConnectionNotFound(_)) {
                    self.state = Some(ConnectionState::Absent);
                }
                Err(err.into())
            }
        }
    }

    /// Remove the stored scope (Open → Absent); a no-op when already absent.
    pub async fn terminate(&mut self) -> Result<(), ConnectionError> {
        self.store.delete(&self.id).await?;
        self.state = Some(ConnectionState::Absent);
        tracing::info!(connection_id = %self.id, "Connection terminated");
        Ok(())
    }

    /// Deliver one frame to the client.
    ///
    /// A client that has gone away is terminated and reported as
    /// `Delivery::PeerGone`; every other transport failure is returned.
    pub async fn relay(&mut self, payload: &[u8]) -> Result<Delivery, ConnectionError> {
        let relay = self.relay.clone().ok_or(ConnectionError::NoRelay)?;
        match relay.post_to_connection(&self.id, payload).await {
            Ok(()) => {
                metrics::record_relay("delivered");
                tracing::debug!(connection_id = %self.id, bytes = payload.len(), "Relayed frame");
                Ok(Delivery::Delivered)
            }
            Err(RelayError::Gone(_)) => {
                metrics::record_relay("gone");
                tracing::warn!(connection_id = %self.id, "Client gone, removing connection");
                self.terminate().await?;
                Ok(Delivery::PeerGone)
            }
            Err(err) => {
                metrics::record_relay("error");
                tracing::error!(connection_id = %self.id, error = %err, "Relay failed");
                Err(err.into())
            }
        }
    }

    /// Server-initiated close. The platform follows up with a DISCONNECT event.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let relay = self.relay.clone().ok_or(ConnectionError::NoRelay)?;
        match relay.delete_connection(&self.id).await {
            Ok(()) => {
                tracing::info!(connection_id = %self.id, "Closed connection");
                Ok(())
            }
            Err(RelayError::Gone(_)) => {
                tracing::debug!(connection_id = %self.id, "Connection already gone at close");
                self.terminate().await
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("store", &self.store)
            .field("has_relay", &self.relay.is_some())
            .field("state", &self.state)
            .finish()
    }
}
