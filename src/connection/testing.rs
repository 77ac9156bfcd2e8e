//! Test doubles for the relay transport.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::{BackendKind, StoreConfig};
use crate::connection::relay::{RelayError, RelayTransport};
use crate::store::{ConnectionStore, FileStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Deliver,
    Gone,
    Fail,
}

/// Records every call and answers according to its behaviour.
#[derive(Debug)]
pub(crate) struct RecordingRelay {
    behaviour: Behaviour,
    posts: Mutex<Vec<(String, Vec<u8>)>>,
    deletes: Mutex<Vec<String>>,
}

impl RecordingRelay {
    pub(crate) fn new() -> Self {
        Self::with(Behaviour::Deliver)
    }

    pub(crate) fn gone() -> Self {
        Self::with(Behaviour::Gone)
    }

    pub(crate) fn failing() -> Self {
        Self::with(Behaviour::Fail)
    }

    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            posts: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn posted(&self) -> Vec<(String, Vec<u8>)> {
        self.posts.lock().unwrap().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayTransport for RecordingRelay {
    async fn post_to_connection(&self, id: &str, data: &[u8]) -> Result<(), RelayError> {
        self.posts.lock().unwrap().push((id.to_string(), data.to_vec()));
        match self.behaviour {
            Behaviour::Deliver => Ok(()),
            Behaviour::Gone => Err(RelayError::Gone(id.to_string())),
            Behaviour::Fail => Err(RelayError::Transport("HTTP 500: boom".to_string())),
        }
    }

    async fn delete_connection(&self, id: &str) -> Result<(), RelayError> {
        self.deletes.lock().unwrap().push(id.to_string());
        match self.behaviour {
            Behaviour::Deliver => Ok(()),
            Behaviour::Gone => Err(RelayError::Gone(id.to_string())),
            Behaviour::Fail => Err(RelayError::Transport("HTTP 500: boom".to_string())),
        }
    }
}

/// A file store inside `dir`.
pub(crate) fn file_store(dir: &tempfile::TempDir) -> ConnectionStore {
    let config = StoreConfig {
        backend: BackendKind::File,
        file_path: Some(dir.path().join("connections.json")),
        ..StoreConfig::default()
    };
    ConnectionStore::File(FileStore::open(&config).unwrap())
}
