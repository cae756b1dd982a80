//! Bounded retry around storage calls.
//!
//! Retries happen only on errors, never on successful-but-unexpected
//! results, and the final error propagates unmodified. Immediate retry, no
//! backoff.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncSeekExt;
use tracing::debug;

use crate::error::AttachResult;
use crate::storage::{PutResult, Storage, UrlOptions};
use crate::types::{ContentStream, Metadata};

/// Run `op` up to `max_attempts` times, returning the first success or the
/// last error. `max_attempts` of zero is treated as one.
pub async fn with_retry<T, F, Fut>(max_attempts: u32, mut op: F) -> AttachResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AttachResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => return Err(err),
            Err(err) => {
                debug!(attempt, error = %err, "storage call failed, retrying");
                attempt += 1;
            }
        }
    }
}

/// Storage decorator that retries failed calls. Rewinds the source between
/// put attempts so every attempt writes the full content.
pub struct RetryStorage {
    inner: Arc<dyn Storage>,
    max_attempts: u32,
}

impl RetryStorage {
    pub fn new<S: Storage + 'static>(inner: S, max_attempts: u32) -> Self {
        Self {
            inner: Arc::new(inner),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn wrap(inner: Arc<dyn Storage>, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl Storage for RetryStorage {
    async fn put(
        &self,
        location: &str,
        source: &mut ContentStream,
        metadata: &Metadata,
    ) -> AttachResult<PutResult> {
        let mut attempt = 1;
        loop {
            source.rewind().await?;
            match self.inner.put(location, source, metadata).await {
                Ok(result) => return Ok(result),
                Err(err) if attempt >= self.max_attempts => return Err(err),
                Err(err) => {
                    debug!(attempt, location, error = %err, "put failed, retrying");
                    attempt += 1;
                }
            }
        }
    }

    async fn open(&self, location: &str) -> AttachResult<ContentStream> {
        with_retry(self.max_attempts, || self.inner.open(location)).await
    }

    async fn exists(&self, location: &str) -> AttachResult<bool> {
        with_retry(self.max_attempts, || self.inner.exists(location)).await
    }

    async fn delete(&self, location: &str) -> AttachResult<()> {
        with_retry(self.max_attempts, || self.inner.delete(location)).await
    }

    fn url(&self, location: &str, options: &UrlOptions) -> String {
        self.inner.url(location, options)
    }

    fn local_root(&self) -> Option<&Path> {
        self.inner.local_root()
    }
}
