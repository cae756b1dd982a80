use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{AttachError, AttachResult};
use crate::storage::{PutResult, Storage, UrlOptions};
use crate::types::{ContentStream, Metadata};

struct StoredObject {
    data: Bytes,
    #[allow(dead_code)]
    metadata: Metadata,
}

/// In-memory backend for testing and development
#[derive(Clone)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored objects. Test helper.
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Synchronous existence check. Test helper.
    pub fn contains(&self, location: &str) -> bool {
        self.objects.read().contains_key(location)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(
        &self,
        location: &str,
        source: &mut ContentStream,
        metadata: &Metadata,
    ) -> AttachResult<PutResult> {
        source.rewind().await?;
        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;
        let size = data.len() as u64;

        self.objects.write().insert(
            location.to_string(),
            StoredObject {
                data: Bytes::from(data),
                metadata: metadata.clone(),
            },
        );

        Ok(PutResult { size })
    }

    async fn open(&self, location: &str) -> AttachResult<ContentStream> {
        let data = self
            .objects
            .read()
            .get(location)
            .map(|object| object.data.clone())
            .ok_or_else(|| AttachError::not_found(location))?;

        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn exists(&self, location: &str) -> AttachResult<bool> {
        Ok(self.objects.read().contains_key(location))
    }

    async fn delete(&self, location: &str) -> AttachResult<()> {
        self.objects.write().remove(location);
        Ok(())
    }

    fn url(&self, location: &str, _options: &UrlOptions) -> String {
        format!("memory://{location}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::content_from_bytes;

    #[tokio::test]
    async fn put_open_delete_cycle() {
        let storage = MemoryStorage::new();
        let mut source = content_from_bytes("hello");

        let result = storage
            .put("abc", &mut source, &Metadata::new())
            .await
            .unwrap();
        assert_eq!(result.size, 5);
        assert!(storage.exists("abc").await.unwrap());

        let mut opened = storage.open("abc").await.unwrap();
        let mut data = Vec::new();
        opened.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"hello");

        storage.delete("abc").await.unwrap();
        assert!(!storage.exists("abc").await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.delete("never-existed").await.unwrap();
        storage.delete("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn open_missing_location_is_not_found() {
        let storage = MemoryStorage::new();
        let result = storage.open("missing").await;
        assert!(matches!(result, Err(AttachError::NotFound { .. })));
    }

    #[tokio::test]
    async fn multi_delete_falls_back_to_sequential() {
        let storage = MemoryStorage::new();
        for location in ["a", "b"] {
            let mut source = content_from_bytes("x");
            storage
                .put(location, &mut source, &Metadata::new())
                .await
                .unwrap();
        }

        storage
            .multi_delete(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(storage.object_count(), 0);
    }
}
