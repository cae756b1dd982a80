use std::collections::BTreeMap;

/// Which lifecycle operation is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Initial upload into the temporary tier
    Cache,
    /// Re-upload of a cached file into the permanent tier
    Promote,
    /// Deletion of a superseded file after a save
    Replace,
    /// Deletion because the host record is going away
    Destroy,
    /// Metadata re-extraction against an existing file
    Refresh,
}

/// Ambient context threaded through every hook and pipeline step, enabling
/// cross-hook correlation without global state.
#[derive(Debug, Clone)]
pub struct OpContext {
    /// Opaque handle to the host record (never persisted by the engine)
    pub record: serde_json::Value,
    /// Attachment slot name on the host record
    pub name: String,
    /// Operation being performed
    pub action: Action,
    /// Destination tier for the operation
    pub tier: String,
    /// Extension-defined extra data
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl OpContext {
    pub fn new(
        record: serde_json::Value,
        name: impl Into<String>,
        action: Action,
        tier: impl Into<String>,
    ) -> Self {
        Self {
            record,
            name: name.into(),
            action,
            tier: tier.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra<K: Into<String>, V: serde::Serialize>(mut self, key: K, value: V) -> Self {
        self.extra.insert(
            key.into(),
            serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        );
        self
    }
}
