//! Named configuration documents for jobs.
//!
//! A deployment job does not receive its configuration inline: the control
//! plane writes a JSON document to shared blob storage and hands the
//! scheduler its addressable path, which the job reads at start. The local
//! filesystem implementation targets the shared directory every cluster
//! node mounts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};

/// Store for named configuration documents.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Write `document` under `name`, returning its addressable path.
    async fn put(&self, name: &str, document: &serde_json::Value) -> ControlResult<String>;

    /// Read the document at an addressable path returned by [`put`].
    ///
    /// [`put`]: ConfigStore::put
    async fn get(&self, path: &str) -> ControlResult<serde_json::Value>;
}

/// Configuration store over a shared local directory.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    root: PathBuf,
}

impl FsConfigStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ConfigStore for FsConfigStore {
    async fn put(&self, name: &str, document: &serde_json::Value) -> ControlResult<String> {
        let path = self.root.join(name);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ControlError::Blob(format!("failed to create {}: {e}", parent.display())))?;
        }

        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| ControlError::Serialisation(format!("failed to serialise config: {e}")))?;

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ControlError::Blob(format!("failed to write {}: {e}", path.display())))?;

        Ok(path.to_string_lossy().into_owned())
    }

    async fn get(&self, path: &str) -> ControlResult<serde_json::Value> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ControlError::Blob(format!("failed to read {path}: {e}")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| ControlError::Serialisation(format!("failed to parse config: {e}")))
    }
}

/// In-memory configuration store for tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    documents: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryConfigStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn put(&self, name: &str, document: &serde_json::Value) -> ControlResult<String> {
        let path = format!("mem://{name}");
        self.documents
            .lock()
            .map_err(|_| ControlError::internal("lock poisoned"))?
            .insert(path.clone(), document.clone());
        Ok(path)
    }

    async fn get(&self, path: &str) -> ControlResult<serde_json::Value> {
        self.documents
            .lock()
            .map_err(|_| ControlError::internal("lock poisoned"))?
            .get(path)
            .cloned()
            .ok_or_else(|| ControlError::Blob(format!("no document at {path}")))
    }
}
