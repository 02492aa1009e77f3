//! Object store collaborators.
//!
//! Everything the runner persists (status documents, job responses, packaged
//! output) goes through the [`ObjectStore`] trait, addressed by bucket and key.

mod fs;
mod http;
mod memory;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::config::StoreConfig;

pub use fs::FsObjectStore;
pub use http::HttpObjectStore;
pub use memory::{MemoryObjectStore, StoredObject};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Called with `(uploaded, total)` bytes while a file upload is under way.
pub type UploadProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` at `key`, replacing any existing object.
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Upload a local file, which may be too large to hold in memory.
    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()>;

    /// `put_file` with progress reports.
    ///
    /// Backends that cannot observe the transfer report once, on completion.
    async fn put_file_with_progress(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: UploadProgress,
    ) -> Result<()> {
        let total = tokio::fs::metadata(path).await?.len();
        self.put_file(bucket, key, path).await?;
        progress(total, total);
        Ok(())
    }

    /// Fetch an object, or `None` if the key does not exist.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;

    async fn head(&self, bucket: &str, key: &str) -> Result<bool>;

    async fn delete_many(&self, bucket: &str, keys: &[String]) -> Result<()>;
}

/// Serialize `value` as JSON and store it at `key`.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    store.put(bucket, key, body, JSON_CONTENT_TYPE).await
}

/// Reject an empty key list before touching the store.
pub(crate) fn ensure_keys(keys: &[String]) -> Result<()> {
    if keys.is_empty() {
        bail!("Keys are required, and keys must be a non-empty list");
    }
    Ok(())
}

/// Factory function to create a store based on config
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
        return Ok(Arc::new(HttpObjectStore::new(endpoint)?));
    }
    if let Some(root) = &config.root {
        return Ok(Arc::new(FsObjectStore::new(root.clone())));
    }
    bail!("No object store configured: set store.endpoint or store.root")
}
