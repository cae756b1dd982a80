mod fs;
mod memory;
mod registry;

pub use fs::FsStorage;
pub use memory::MemoryStorage;
pub use registry::{TierRegistry, TierRegistryBuilder};

use std::path::Path;

use async_trait::async_trait;

use crate::error::AttachResult;
use crate::types::{ContentStream, Metadata};

/// Result of a successful put operation
#[derive(Debug, Clone)]
pub struct PutResult {
    pub size: u64,
}

/// Options for URL generation
#[derive(Debug, Clone, Default)]
pub struct UrlOptions {
    /// Suggested download filename
    pub download_as: Option<String>,
    /// Expiry for signed URLs, where the backend supports them
    pub expires_in_secs: Option<u64>,
}

/// Storage capability implemented per tier. A single instance is shared
/// across concurrent operations; every call is independent (no backend-held
/// lock spans multiple calls).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist content under an opaque location string
    async fn put(
        &self,
        location: &str,
        source: &mut ContentStream,
        metadata: &Metadata,
    ) -> AttachResult<PutResult>;

    /// Open stored content for reading
    async fn open(&self, location: &str) -> AttachResult<ContentStream>;

    /// Check whether a location holds an object
    async fn exists(&self, location: &str) -> AttachResult<bool>;

    /// Delete an object. Deleting a nonexistent location is not an error.
    async fn delete(&self, location: &str) -> AttachResult<()>;

    /// URL for an object
    fn url(&self, location: &str, options: &UrlOptions) -> String;

    /// Bulk deletion. Falls back to sequential deletes.
    async fn multi_delete(&self, locations: &[String]) -> AttachResult<()> {
        for location in locations {
            self.delete(location).await?;
        }
        Ok(())
    }

    /// Root directory when this backend is a local filesystem. Two tiers
    /// that both expose a root can promote by rename instead of re-upload.
    fn local_root(&self) -> Option<&Path> {
        None
    }
}
