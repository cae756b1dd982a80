use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{AttachError, AttachResult};
use crate::storage::{PutResult, Storage, UrlOptions};
use crate::types::{ContentStream, Metadata};

/// Filesystem backend rooted at a directory. Writes go to a temporary
/// sibling first and are renamed into place.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> AttachResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn put(
        &self,
        location: &str,
        source: &mut ContentStream,
        _metadata: &Metadata,
    ) -> AttachResult<PutResult> {
        source.rewind().await?;

        let path = self.path_for(location);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = self
            .root
            .join(format!("{location}.{}.part", Uuid::new_v4().simple()));
        let mut file = tokio::fs::File::create(&staging).await?;
        let size = tokio::io::copy(source, &mut file).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&staging, &path).await?;
        Ok(PutResult { size })
    }

    async fn open(&self, location: &str) -> AttachResult<ContentStream> {
        let path = self.path_for(location);
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AttachError::not_found(location))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, location: &str) -> AttachResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(location)).await?)
    }

    async fn delete(&self, location: &str) -> AttachResult<()> {
        match tokio::fs::remove_file(self.path_for(location)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn url(&self, location: &str, _options: &UrlOptions) -> String {
        format!("file://{}", self.path_for(location).display())
    }

    fn local_root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::content_from_bytes;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn put_open_delete_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();

        let mut source = content_from_bytes("on disk");
        let result = storage
            .put("token1", &mut source, &Metadata::new())
            .await
            .unwrap();
        assert_eq!(result.size, 7);
        assert!(storage.exists("token1").await.unwrap());

        let mut opened = storage.open("token1").await.unwrap();
        let mut data = Vec::new();
        opened.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"on disk");

        storage.delete("token1").await.unwrap();
        assert!(!storage.exists("token1").await.unwrap());
        // Idempotent
        storage.delete("token1").await.unwrap();
    }

    #[tokio::test]
    async fn exposes_local_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();
        assert_eq!(storage.local_root(), Some(dir.path()));
    }
}
