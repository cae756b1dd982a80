//! Packaged behavior changes installed on a class builder via
//! [`ClassBuilder::with`](crate::attacher::ClassBuilder::with). Each
//! extension registers hooks or swaps dispatchers; none of them require
//! changes to the core lifecycle.

mod backgrounding;
mod backup;
mod keep_files;
mod mirroring;

pub use backgrounding::Backgrounding;
pub use backup::Backup;
pub use keep_files::KeepFiles;
pub use mirroring::Mirroring;

use crate::error::AttachResult;
use crate::storage::TierRegistry;
use crate::types::FileRef;

fn all_locations(reference: &FileRef) -> Vec<String> {
    let mut locations = vec![reference.location().to_string()];
    locations.extend(reference.variant_locations().into_iter().map(str::to_string));
    locations
}

/// Copy a stored file and its variants into another tier, keeping the same
/// locations.
pub(crate) async fn replicate_into(
    tiers: &TierRegistry,
    stored: &FileRef,
    target_tier: &str,
) -> AttachResult<()> {
    let origin = tiers.get(stored.tier())?;
    let target = tiers.get(target_tier)?;

    for location in all_locations(stored) {
        let mut source = origin.open(&location).await?;
        target.put(&location, &mut source, stored.metadata()).await?;
    }
    Ok(())
}

/// Delete the copies of a file held in another tier
pub(crate) async fn remove_copies(
    tiers: &TierRegistry,
    reference: &FileRef,
    tier: &str,
) -> AttachResult<()> {
    tiers.get(tier)?.multi_delete(&all_locations(reference)).await
}
