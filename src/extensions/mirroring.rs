use std::sync::Arc;

use tracing::warn;

use crate::attacher::{ClassBuilder, Extension};
use crate::extensions::{remove_copies, replicate_into};
use crate::hooks::{Around, Next, OpFuture};
use crate::storage::TierRegistry;
use crate::types::{FileRef, OpContext};
use crate::uploader::StoreRequest;

/// Replicate writes to one tier into additional tiers, under the same
/// locations. Replication is best effort: a mirror failure is logged and
/// the primary write still succeeds.
pub struct Mirroring {
    tiers: Arc<TierRegistry>,
    source: String,
    mirrors: Vec<String>,
    mirror_deletes: bool,
}

impl Mirroring {
    /// Mirror writes landing in `source` into each tier in `mirrors`
    pub fn new(
        tiers: Arc<TierRegistry>,
        source: impl Into<String>,
        mirrors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            tiers,
            source: source.into(),
            mirrors: mirrors.into_iter().map(Into::into).collect(),
            mirror_deletes: true,
        }
    }

    /// Whether deletions in the source tier propagate to mirrors (on by
    /// default)
    pub fn mirror_deletes(mut self, enabled: bool) -> Self {
        self.mirror_deletes = enabled;
        self
    }
}

impl Around<StoreRequest, FileRef> for Mirroring {
    fn around<'a>(
        &'a self,
        input: StoreRequest,
        ctx: &'a OpContext,
        next: Next<'a, StoreRequest, FileRef>,
    ) -> OpFuture<'a, FileRef>
    where
        StoreRequest: 'a,
        FileRef: 'a,
    {
        Box::pin(async move {
            let replicate = input.tier == self.source;
            let stored = next.run(input, ctx).await?;

            if replicate {
                for mirror in &self.mirrors {
                    if let Err(err) = replicate_into(&self.tiers, &stored, mirror).await {
                        warn!(
                            mirror = %mirror,
                            location = stored.location(),
                            error = %err,
                            "mirror replication failed"
                        );
                    }
                }
            }
            Ok(stored)
        })
    }
}

impl Around<FileRef, FileRef> for Mirroring {
    fn around<'a>(
        &'a self,
        input: FileRef,
        ctx: &'a OpContext,
        next: Next<'a, FileRef, FileRef>,
    ) -> OpFuture<'a, FileRef>
    where
        FileRef: 'a,
    {
        Box::pin(async move {
            let deleted = next.run(input, ctx).await?;

            if self.mirror_deletes && deleted.tier() == self.source {
                for mirror in &self.mirrors {
                    if let Err(err) = remove_copies(&self.tiers, &deleted, mirror).await {
                        warn!(
                            mirror = %mirror,
                            location = deleted.location(),
                            error = %err,
                            "mirror deletion failed"
                        );
                    }
                }
            }
            Ok(deleted)
        })
    }
}

impl Extension for Mirroring {
    fn install(self, builder: ClassBuilder) -> ClassBuilder {
        let this = Arc::new(self);
        builder
            .around_store(this.clone())
            .around_delete(this)
    }
}
