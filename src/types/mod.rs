mod content;
mod ctx;
mod file_ref;

pub use content::{content_from_bytes, Content, ContentStream};
pub use ctx::{Action, OpContext};
pub use file_ref::{meta, FileRef, Metadata, MetadataValue, SerializedRef};
