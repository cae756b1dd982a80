use std::sync::Arc;

use tracing::debug;

use crate::attacher::{ClassBuilder, Extension};
use crate::hooks::{Around, Next, OpFuture};
use crate::types::{Action, FileRef, OpContext};

/// Soft delete: suppress the physical deletion of replaced or destroyed
/// files while the slot state still changes normally. Cleanup of cached
/// copies after promotion is never suppressed.
pub struct KeepFiles {
    destroyed: bool,
    replaced: bool,
}

impl KeepFiles {
    /// Keep files on both replace and destroy
    pub fn all() -> Self {
        Self {
            destroyed: true,
            replaced: true,
        }
    }

    /// Keep files only when the host record is destroyed
    pub fn destroyed() -> Self {
        Self {
            destroyed: true,
            replaced: false,
        }
    }

    /// Keep files only when they are replaced by a reassignment
    pub fn replaced() -> Self {
        Self {
            destroyed: false,
            replaced: true,
        }
    }

    fn keeps(&self, action: Action) -> bool {
        match action {
            Action::Destroy => self.destroyed,
            Action::Replace => self.replaced,
            _ => false,
        }
    }
}

impl Around<FileRef, FileRef> for KeepFiles {
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
            if self.keeps(ctx.action) {
                debug!(
                    tier = input.tier(),
                    location = input.location(),
                    "keeping file instead of deleting"
                );
                return Ok(input);
            }
            next.run(input, ctx).await
        })
    }
}

impl Extension for KeepFiles {
    fn install(self, builder: ClassBuilder) -> ClassBuilder {
        builder.around_delete(Arc::new(self))
    }
}
