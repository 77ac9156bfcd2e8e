//! Single-file connection store for local debugging.
//!
//! All connections live in one JSON document mapping connection id to scope
//! text. Every operation reads the whole file and writes it back through a
//! temporary file. There is no locking: concurrent invocations can lose
//! updates, so this backend must never be used by a deployed function.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::StoreConfig;
use crate::store::{StoreError, StoreResult};

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Open the store named by `config.file_path`.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let path = config.file_path.clone().ok_or_else(|| {
            StoreError::Configuration("a file path is required for the file backend".to_string())
        })?;
        Self::at(path)
    }

    /// Open the store at `path`; its directory must exist.
    pub fn at(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(StoreError::Configuration(format!(
                    "directory {} does not exist",
                    parent.display()
                )));
            }
        }
        tracing::warn!(
            path = %path.display(),
            "The file connection store is for local debugging only and will not work in a deployed environment"
        );
        Ok(Self { path })
    }

    pub async fn create(&self, id: &str, scope: &str) -> StoreResult<()> {
        let mut entries = self.load().await?;
        if entries.contains_key(id) {
            return Err(StoreError::DuplicateConnection(id.to_string()));
        }
        entries.insert(id.to_string(), scope.to_string());
        self.save(&entries).await
    }

    pub async fn fetch(&self, id: &str) -> StoreResult<String> {
        self.load()
            .await?
            .remove(id)
            .ok_or_else(|| StoreError::ConnectionNotFound(id.to_string()))
    }

    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut entries = self.load().await?;
        if entries.remove(id).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }

    async fn load(&self) -> StoreResult<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::BackendUnavailable(format!(
                    "{} is not a connection store file: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StoreError::BackendUnavailable(e.to_string())),
        }
    }

    async fn save(&self, entries: &BTreeMap<String, String>) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))
    }
}
