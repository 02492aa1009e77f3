use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ObjectStore, ensure_keys};

/// A single recorded `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<(String, String), StoredObject>,
    puts: Vec<StoredObject>,
}

/// In-process store used for dry runs and tests.
///
/// Keeps the latest object per key plus the full history of puts.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every put in the order it happened.
    pub fn puts(&self) -> Vec<StoredObject> {
        self.lock().puts.clone()
    }

    pub fn put_count(&self) -> usize {
        self.lock().puts.len()
    }

    /// Latest object body at `key`, if any.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.body.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let object = StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body,
            content_type: content_type.to_string(),
        };

        let mut inner = self.lock();
        inner.puts.push(object.clone());
        inner
            .objects
            .insert((bucket.to_string(), key.to_string()), object);
        Ok(())
    }

    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let body = tokio::fs::read(path).await?;
        self.put(bucket, key, body, "application/octet-stream").await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.object(bucket, key))
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self
            .lock()
            .objects
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn delete_many(&self, bucket: &str, keys: &[String]) -> Result<()> {
        ensure_keys(keys)?;
        let mut inner = self.lock();
        for key in keys {
            inner.objects.remove(&(bucket.to_string(), key.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_overwrites_and_records_history() {
        let store = MemoryObjectStore::new();
        store.put("b", "k", b"one".to_vec(), "text/plain").await.unwrap();
        store.put("b", "k", b"two".to_vec(), "text/plain").await.unwrap();

        assert_eq!(store.put_count(), 2);
        assert_eq!(store.object("b", "k").unwrap(), b"two");
        assert!(store.head("b", "k").await.unwrap());
        assert!(!store.head("other", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_delete_many() {
        let store = MemoryObjectStore::new();
        store.put("b", "x", vec![1], "a/b").await.unwrap();
        store.put("b", "y", vec![2], "a/b").await.unwrap();

        store
            .delete_many("b", &["x".to_string(), "missing".to_string()])
            .await
            .unwrap();

        assert!(!store.head("b", "x").await.unwrap());
        assert!(store.head("b", "y").await.unwrap());
        assert!(store.delete_many("b", &[]).await.is_err());
    }
}
