use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AttachError, AttachResult};
use crate::storage::Storage;

/// Mapping from tier name to storage backend. Built once at configuration
/// time and shared read-only behind an `Arc` afterwards; each `FileRef`
/// carries the tier name it is resolved against.
pub struct TierRegistry {
    tiers: HashMap<String, Arc<dyn Storage>>,
}

impl TierRegistry {
    pub fn builder() -> TierRegistryBuilder {
        TierRegistryBuilder {
            tiers: HashMap::new(),
        }
    }

    /// Look up the backend for a tier name
    pub fn get(&self, tier: &str) -> AttachResult<Arc<dyn Storage>> {
        self.tiers
            .get(tier)
            .cloned()
            .ok_or_else(|| AttachError::unknown_tier(tier))
    }

    pub fn contains(&self, tier: &str) -> bool {
        self.tiers.contains_key(tier)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tiers.keys().map(String::as_str)
    }
}

/// Builder for [`TierRegistry`]
pub struct TierRegistryBuilder {
    tiers: HashMap<String, Arc<dyn Storage>>,
}

impl TierRegistryBuilder {
    /// Register a backend under a tier name
    pub fn tier<S: Storage + 'static>(mut self, name: impl Into<String>, backend: S) -> Self {
        self.tiers.insert(name.into(), Arc::new(backend));
        self
    }

    /// Register an already-shared backend under a tier name
    pub fn tier_shared(mut self, name: impl Into<String>, backend: Arc<dyn Storage>) -> Self {
        self.tiers.insert(name.into(), backend);
        self
    }

    pub fn build(self) -> TierRegistry {
        TierRegistry { tiers: self.tiers }
    }
}
