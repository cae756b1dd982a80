use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::AttachResult;
use crate::storage::{TierRegistry, UrlOptions};
use crate::types::ContentStream;

/// Well-known metadata keys
pub mod meta {
    pub const SIZE: &str = "size";
    pub const FILENAME: &str = "filename";
    pub const MIME_TYPE: &str = "mime_type";
    pub const UPLOADED_AT: &str = "uploaded_at";
    /// Prefix for derived-variant locations (`variant.<name>`)
    pub const VARIANT_PREFIX: &str = "variant.";
}

/// A single metadata value: text, number, or null
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Number(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_f64().map(|n| n as u64)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// File metadata map. Merges are left-to-right: later keys override earlier.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Immutable reference to a persisted file within one storage tier.
///
/// Identity is `(tier, location)`; metadata differences do not affect
/// equality. Never mutated after creation; [`FileRef::with_metadata`]
/// copies-and-extends into a new value instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "SerializedRef", from = "SerializedRef")]
pub struct FileRef {
    tier: String,
    location: String,
    metadata: Metadata,
}

impl FileRef {
    pub fn new(tier: impl Into<String>, location: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            tier: tier.into(),
            location: location.into(),
            metadata,
        }
    }

    pub fn tier(&self) -> &str {
        &self.tier
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Copy this reference, extending its metadata (later keys win)
    pub fn with_metadata(&self, extra: Metadata) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.extend(extra);
        Self {
            tier: self.tier.clone(),
            location: self.location.clone(),
            metadata,
        }
    }

    pub fn size(&self) -> Option<u64> {
        self.metadata.get(meta::SIZE).and_then(MetadataValue::as_u64)
    }

    pub fn filename(&self) -> Option<&str> {
        self.metadata
            .get(meta::FILENAME)
            .and_then(MetadataValue::as_str)
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.metadata
            .get(meta::MIME_TYPE)
            .and_then(MetadataValue::as_str)
    }

    /// Locations of derived variants recorded on this reference
    pub fn variant_locations(&self) -> Vec<&str> {
        self.metadata
            .iter()
            .filter(|(key, _)| key.starts_with(meta::VARIANT_PREFIX))
            .filter_map(|(_, value)| value.as_str())
            .collect()
    }

    /// Check whether the underlying object still exists in its tier
    pub async fn exists(&self, tiers: &TierRegistry) -> AttachResult<bool> {
        tiers.get(&self.tier)?.exists(&self.location).await
    }

    /// Open the underlying object for reading
    pub async fn open(&self, tiers: &TierRegistry) -> AttachResult<ContentStream> {
        tiers.get(&self.tier)?.open(&self.location).await
    }

    /// Delete the underlying object. Prefer attacher-mediated deletion;
    /// this bypasses the hook chain.
    pub async fn delete(&self, tiers: &TierRegistry) -> AttachResult<()> {
        tiers.get(&self.tier)?.delete(&self.location).await
    }

    /// URL for the underlying object
    pub fn url(&self, tiers: &TierRegistry, options: &UrlOptions) -> AttachResult<String> {
        Ok(tiers.get(&self.tier)?.url(&self.location, options))
    }
}

impl PartialEq for FileRef {
    fn eq(&self, other: &Self) -> bool {
        self.tier == other.tier && self.location == other.location
    }
}

impl Eq for FileRef {}

impl Hash for FileRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tier.hash(state);
        self.location.hash(state);
    }
}

/// Persisted form of a [`FileRef`], as stored in the host record's
/// attachment column: `{id, storage, metadata}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedRef {
    pub id: String,
    pub storage: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl From<FileRef> for SerializedRef {
    fn from(r: FileRef) -> Self {
        Self {
            id: r.location,
            storage: r.tier,
            metadata: r.metadata,
        }
    }
}

impl From<SerializedRef> for FileRef {
    fn from(s: SerializedRef) -> Self {
        Self {
            tier: s.storage,
            location: s.id,
            metadata: s.metadata,
        }
    }
}
