use std::sync::Arc;

use tracing::warn;

use crate::attacher::{ClassBuilder, Extension};
use crate::extensions::{remove_copies, replicate_into};
use crate::hooks::{Around, Next, OpFuture};
use crate::storage::TierRegistry;
use crate::types::{Action, FileRef, OpContext};
use crate::uploader::StoreRequest;

/// Keep a copy of every promoted file in a dedicated backup tier. Backup
/// writes are best effort and never fail the promotion.
pub struct Backup {
    tiers: Arc<TierRegistry>,
    tier: String,
    delete_backups: bool,
}

impl Backup {
    pub fn new(tiers: Arc<TierRegistry>, tier: impl Into<String>) -> Self {
        Self {
            tiers,
            tier: tier.into(),
            delete_backups: false,
        }
    }

    /// Whether deleting a stored file also deletes its backup copy (off by
    /// default)
    pub fn delete_backups(mut self, enabled: bool) -> Self {
        self.delete_backups = enabled;
        self
    }
}

impl Around<StoreRequest, FileRef> for Backup {
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
            let stored = next.run(input, ctx).await?;

            if ctx.action == Action::Promote {
                if let Err(err) = replicate_into(&self.tiers, &stored, &self.tier).await {
                    warn!(
                        backup = %self.tier,
                        location = stored.location(),
                        error = %err,
                        "backup copy failed"
                    );
                }
            }
            Ok(stored)
        })
    }
}

impl Around<FileRef, FileRef> for Backup {
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

            let covered = matches!(ctx.action, Action::Replace | Action::Destroy);
            if self.delete_backups && covered {
                if let Err(err) = remove_copies(&self.tiers, &deleted, &self.tier).await {
                    warn!(
                        backup = %self.tier,
                        location = deleted.location(),
                        error = %err,
                        "backup deletion failed"
                    );
                }
            }
            Ok(deleted)
        })
    }
}

impl Extension for Backup {
    fn install(self, builder: ClassBuilder) -> ClassBuilder {
        let this = Arc::new(self);
        builder
            .around_store(this.clone())
            .around_delete(this)
    }
}
