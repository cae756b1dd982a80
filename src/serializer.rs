use crate::error::AttachResult;
use crate::types::{FileRef, SerializedRef};

/// Pluggable serializer for the host record's attachment column. The
/// persisted shape is always `{id, storage, metadata}`; only the encoding
/// varies.
pub trait RefSerializer: Send + Sync {
    fn serialize(&self, reference: &FileRef) -> AttachResult<String>;
    fn deserialize(&self, payload: &str) -> AttachResult<FileRef>;
}

/// Default JSON column serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl RefSerializer for JsonSerializer {
    fn serialize(&self, reference: &FileRef) -> AttachResult<String> {
        Ok(serde_json::to_string(reference)?)
    }

    fn deserialize(&self, payload: &str) -> AttachResult<FileRef> {
        let serialized: SerializedRef = serde_json::from_str(payload)?;
        Ok(serialized.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{meta, Metadata, MetadataValue};

    #[test]
    fn json_round_trip() {
        let mut metadata = Metadata::new();
        metadata.insert(meta::SIZE.to_string(), MetadataValue::Number(42.0));
        metadata.insert(meta::FILENAME.to_string(), "photo.jpg".into());
        metadata.insert("checksum".to_string(), MetadataValue::Null);
        let reference = FileRef::new("store", "abc123.jpg", metadata);

        let serializer = JsonSerializer;
        let payload = serializer.serialize(&reference).unwrap();
        let back = serializer.deserialize(&payload).unwrap();

        assert_eq!(back, reference);
        assert_eq!(back.metadata(), reference.metadata());
    }

    #[test]
    fn deserializes_payload_without_metadata() {
        let back = JsonSerializer
            .deserialize(r#"{"id":"abc","storage":"cache"}"#)
            .unwrap();
        assert_eq!(back.location(), "abc");
        assert_eq!(back.tier(), "cache");
        assert!(back.metadata().is_empty());
    }
}
