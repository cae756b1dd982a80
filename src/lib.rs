//! # attache: Attachment lifecycle management
//!
//! `attache` moves user-uploaded files through a two-tier lifecycle: fresh
//! uploads land in a temporary *cache* tier immediately, and are promoted
//! into the permanent *store* tier once their host record's save commits.
//! Everything in between (validation, metadata extraction, processing,
//! replacement cleanup, destruction) is handled by the engine so services
//! only decide *what* to attach, never *how*.
//!
//! ## Key Features
//!
//! - **Direct-upload friendly**: cache before save, promote after, so form
//!   redisplays and wizard flows never lose an upload
//! - **Crash-safe by construction**: records only ever reference files that
//!   already exist; a crash leaves an orphaned file, never a broken record
//! - **Race-safe promotion**: compare-and-swap installation means a stale
//!   background promotion can never clobber a newer assignment
//! - **Storage agnostic**: tiers are named backends (filesystem, memory,
//!   custom implementations) resolved through a registry
//! - **Extensible**: effect hooks and around interceptors at every step,
//!   with soft delete, mirroring, backup, and backgrounding shipped in
//!
//! ## Quick Start
//!
//! ```rust
//! use attache::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> AttachResult<()> {
//! // 1. Name your storage tiers
//! let tiers = Arc::new(
//!     TierRegistry::builder()
//!         .tier("cache", MemoryStorage::new())
//!         .tier("store", MemoryStorage::new())
//!         .build(),
//! );
//!
//! // 2. Configure the attachment class once
//! let class = AttachmentClass::builder(tiers).build()?;
//!
//! // 3. Attach content to a record slot
//! let attacher = class.attacher(serde_json::json!({"id": 1}), "avatar");
//! attacher
//!     .assign(AssignInput::Stream {
//!         source: content_from_bytes("hello"),
//!         metadata: Metadata::new(),
//!     })
//!     .await?;
//!
//! // 4. After the record saves: promote and clean up
//! attacher.finalize().await?;
//! assert!(matches!(attacher.state(), AttachmentState::Stored(_)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   Your Service   │  ← decides what to attach
//! ├──────────────────┤
//! │     Attacher     │  ← per-record slot state machine
//! ├──────────────────┤
//! │     Uploader     │  ← process / extract / store pipeline
//! ├──────────────────┤
//! │     Storage      │  ← tier backends behind a registry
//! └──────────────────┘
//! ```
//!
//! The attacher never persists anything itself: it produces and consumes
//! the serialized column value, and the host application decides where that
//! value lives.

pub mod attacher;
pub mod background;
pub mod error;
pub mod extensions;
pub mod hooks;
pub mod retry;
pub mod serializer;
pub mod storage;
pub mod types;
pub mod uploader;

// Re-export main types for clean API
pub use attacher::{
    AssignInput, AttachmentClass, AttachmentState, Attacher, ClassBuilder, Extension, HostRecord,
};
pub use background::{
    BackgroundDispatch, Dispatch, FailureCallback, InlineDispatch, Scheduler, Task,
};
pub use error::{AttachError, AttachResult, ValidationIssue};
pub use extensions::{Backgrounding, Backup, KeepFiles, Mirroring};
pub use hooks::{
    effect_fn, validator_fn, Around, EffectHook, HookRegistry, MaxSize, Next, OpFuture, Terminal,
    Validator,
};
pub use retry::{with_retry, RetryStorage};
pub use serializer::{JsonSerializer, RefSerializer};
pub use storage::{
    FsStorage, MemoryStorage, PutResult, Storage, TierRegistry, TierRegistryBuilder, UrlOptions,
};
pub use types::{
    content_from_bytes, meta, Action, Content, ContentStream, FileRef, Metadata, MetadataValue,
    OpContext, SerializedRef,
};
pub use uploader::{
    LocationStrategy, MetadataExtractor, Processed, Processor, RandomLocation, SizeExtractor,
    StoreRequest, Uploader, VariantUpload,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        content_from_bytes, AssignInput, AttachError, AttachResult, AttachmentClass,
        AttachmentState, Attacher, ContentStream, FileRef, MemoryStorage, Metadata, Storage,
        TierRegistry,
    };
}
