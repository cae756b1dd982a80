//! Attachment classes and the per-record attacher state machine.
//!
//! An [`AttachmentClass`] is the configured behavior for one kind of
//! attachment (tiers, pipeline, validation, hooks). An [`Attacher`] binds
//! that class to a single record slot and tracks two references:
//!
//! - `current`: what the slot points at right now
//! - `previous`: the reference superseded by an unsaved reassignment,
//!   deleted by [`Attacher::replace`] once the save commits
//!
//! The attacher is cheaply cloneable and shares its slots, so a clone moved
//! into a background task observes (and participates in) the same
//! compare-and-swap as the caller. Slot locks are plain mutexes and are
//! never held across an await point.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::background::{Dispatch, FailureCallback, InlineDispatch, Task};
use crate::error::{AttachError, AttachResult, ValidationIssue};
use crate::hooks::{Around, EffectHook, HookRegistry, Validator};
use crate::serializer::{JsonSerializer, RefSerializer};
use crate::storage::{TierRegistry, UrlOptions};
use crate::types::{meta, Action, ContentStream, FileRef, Metadata, MetadataValue, OpContext};
use crate::uploader::{
    LocationStrategy, MetadataExtractor, Processed, Processor, RandomLocation, SizeExtractor,
    StoreRequest, Uploader,
};

/// What an attacher can be handed on assignment
pub enum AssignInput {
    /// Detach: clear the slot, remembering the old reference for `replace`
    Clear,
    /// Re-attach an already-persisted reference from its column form
    Serialized(String),
    /// Fresh content to cache
    Stream {
        source: ContentStream,
        metadata: Metadata,
    },
}

/// Where the slot's current reference lives
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentState {
    Empty,
    Cached(FileRef),
    Stored(FileRef),
}

impl AttachmentState {
    pub fn file_ref(&self) -> Option<&FileRef> {
        match self {
            Self::Empty => None,
            Self::Cached(r) | Self::Stored(r) => Some(r),
        }
    }
}

/// Record-side persistence for attachment columns
pub trait HostRecord {
    fn attachment_column(&self, name: &str) -> Option<String>;
    fn set_attachment_column(&mut self, name: &str, value: Option<String>);
}

/// Packaged configuration change: an extension rewrites the builder,
/// typically registering hooks or swapping dispatchers.
pub trait Extension {
    fn install(self, builder: ClassBuilder) -> ClassBuilder;
}

/// Configured behavior for one kind of attachment, shared by every
/// attacher created from it.
pub struct AttachmentClass {
    tiers: Arc<TierRegistry>,
    hooks: Arc<HookRegistry>,
    uploader: Uploader,
    cache_tier: String,
    store_tier: String,
    serializer: Arc<dyn RefSerializer>,
    validators: Vec<Arc<dyn Validator>>,
    promote_dispatch: Arc<dyn Dispatch>,
    delete_dispatch: Arc<dyn Dispatch>,
    on_failure: Arc<FailureCallback>,
}

impl AttachmentClass {
    pub fn builder(tiers: Arc<TierRegistry>) -> ClassBuilder {
        ClassBuilder::new(tiers)
    }

    /// Bind this class to one record slot
    pub fn attacher(
        self: &Arc<Self>,
        record: serde_json::Value,
        name: impl Into<String>,
    ) -> Attacher {
        Attacher {
            inner: Arc::new(AttacherInner {
                class: self.clone(),
                record,
                name: name.into(),
                slots: Mutex::new(Slots::default()),
                errors: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn tiers(&self) -> &Arc<TierRegistry> {
        &self.tiers
    }

    pub fn cache_tier(&self) -> &str {
        &self.cache_tier
    }

    pub fn store_tier(&self) -> &str {
        &self.store_tier
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }
}

/// Builder for [`AttachmentClass`]. Tier names default to `cache` and
/// `store`; everything else has a working default.
pub struct ClassBuilder {
    tiers: Arc<TierRegistry>,
    cache_tier: String,
    store_tier: String,
    processor: Option<Arc<dyn Processor>>,
    extractors: Vec<Arc<dyn MetadataExtractor>>,
    locations: Arc<dyn LocationStrategy>,
    serializer: Arc<dyn RefSerializer>,
    validators: Vec<Arc<dyn Validator>>,
    hooks: HookRegistry,
    promote_dispatch: Arc<dyn Dispatch>,
    delete_dispatch: Arc<dyn Dispatch>,
    on_failure: Arc<FailureCallback>,
}

impl ClassBuilder {
    pub fn new(tiers: Arc<TierRegistry>) -> Self {
        Self {
            tiers,
            cache_tier: "cache".to_string(),
            store_tier: "store".to_string(),
            processor: None,
            extractors: vec![Arc::new(SizeExtractor)],
            locations: Arc::new(RandomLocation),
            serializer: Arc::new(JsonSerializer),
            validators: Vec::new(),
            hooks: HookRegistry::default(),
            promote_dispatch: Arc::new(InlineDispatch),
            delete_dispatch: Arc::new(InlineDispatch),
            on_failure: Arc::new(|err: &AttachError| {
                error!(error = %err, "unhandled attachment failure");
            }),
        }
    }

    pub fn cache_tier(mut self, name: impl Into<String>) -> Self {
        self.cache_tier = name.into();
        self
    }

    pub fn store_tier(mut self, name: impl Into<String>) -> Self {
        self.store_tier = name.into();
        self
    }

    pub fn processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    pub fn extractor(mut self, extractor: impl MetadataExtractor + 'static) -> Self {
        self.extractors.push(Arc::new(extractor));
        self
    }

    pub fn location_strategy(mut self, strategy: impl LocationStrategy + 'static) -> Self {
        self.locations = Arc::new(strategy);
        self
    }

    pub fn serializer(mut self, serializer: impl RefSerializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn before_process(mut self, hook: Arc<dyn EffectHook>) -> Self {
        self.hooks.before_process.push(hook);
        self
    }

    pub fn after_process(mut self, hook: Arc<dyn EffectHook>) -> Self {
        self.hooks.after_process.push(hook);
        self
    }

    pub fn before_store(mut self, hook: Arc<dyn EffectHook>) -> Self {
        self.hooks.before_store.push(hook);
        self
    }

    pub fn after_store(mut self, hook: Arc<dyn EffectHook>) -> Self {
        self.hooks.after_store.push(hook);
        self
    }

    pub fn before_delete(mut self, hook: Arc<dyn EffectHook>) -> Self {
        self.hooks.before_delete.push(hook);
        self
    }

    pub fn after_delete(mut self, hook: Arc<dyn EffectHook>) -> Self {
        self.hooks.after_delete.push(hook);
        self
    }

    pub fn around_process(
        mut self,
        interceptor: Arc<dyn Around<ContentStream, Processed>>,
    ) -> Self {
        self.hooks.around_process.push(interceptor);
        self
    }

    pub fn around_store(mut self, interceptor: Arc<dyn Around<StoreRequest, FileRef>>) -> Self {
        self.hooks.around_store.push(interceptor);
        self
    }

    pub fn around_delete(mut self, interceptor: Arc<dyn Around<FileRef, FileRef>>) -> Self {
        self.hooks.around_delete.push(interceptor);
        self
    }

    pub fn promote_dispatch(mut self, dispatch: Arc<dyn Dispatch>) -> Self {
        self.promote_dispatch = dispatch;
        self
    }

    pub fn delete_dispatch(mut self, dispatch: Arc<dyn Dispatch>) -> Self {
        self.delete_dispatch = dispatch;
        self
    }

    pub fn on_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AttachError) + Send + Sync + 'static,
    {
        self.on_failure = Arc::new(callback);
        self
    }

    /// Apply a packaged extension
    pub fn with<E: Extension>(self, extension: E) -> Self {
        extension.install(self)
    }

    pub fn build(self) -> AttachResult<Arc<AttachmentClass>> {
        for tier in [&self.cache_tier, &self.store_tier] {
            if !self.tiers.contains(tier) {
                return Err(AttachError::unknown_tier(tier.clone()));
            }
        }

        let hooks = Arc::new(self.hooks);
        let uploader = Uploader::new(
            self.tiers.clone(),
            hooks.clone(),
            self.processor,
            self.extractors,
            self.locations,
        );

        Ok(Arc::new(AttachmentClass {
            tiers: self.tiers,
            hooks,
            uploader,
            cache_tier: self.cache_tier,
            store_tier: self.store_tier,
            serializer: self.serializer,
            validators: self.validators,
            promote_dispatch: self.promote_dispatch,
            delete_dispatch: self.delete_dispatch,
            on_failure: self.on_failure,
        }))
    }
}

#[derive(Default)]
struct Slots {
    current: Option<FileRef>,
    previous: Option<FileRef>,
}

struct AttacherInner {
    class: Arc<AttachmentClass>,
    record: serde_json::Value,
    name: String,
    slots: Mutex<Slots>,
    errors: Mutex<Vec<ValidationIssue>>,
}

/// Per-record attachment slot. Clones share state, so a clone captured by a
/// background task races (safely) against foreground reassignment.
#[derive(Clone)]
pub struct Attacher {
    inner: Arc<AttacherInner>,
}

impl Attacher {
    fn class(&self) -> &AttachmentClass {
        &self.inner.class
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn record(&self) -> &serde_json::Value {
        &self.inner.record
    }

    fn op_context(&self, action: Action, tier: &str) -> OpContext {
        OpContext::new(self.inner.record.clone(), self.inner.name.clone(), action, tier)
    }

    /// Current reference, if any
    pub fn current(&self) -> Option<FileRef> {
        self.inner.slots.lock().current.clone()
    }

    /// Reference superseded by an unsaved reassignment, if any
    pub fn previous(&self) -> Option<FileRef> {
        self.inner.slots.lock().previous.clone()
    }

    pub fn state(&self) -> AttachmentState {
        let slots = self.inner.slots.lock();
        match &slots.current {
            None => AttachmentState::Empty,
            Some(r) if r.tier() == self.class().cache_tier => AttachmentState::Cached(r.clone()),
            Some(r) => AttachmentState::Stored(r.clone()),
        }
    }

    /// Validation issues collected by the last assignment
    pub fn errors(&self) -> Vec<ValidationIssue> {
        self.inner.errors.lock().clone()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.errors.lock().is_empty()
    }

    pub fn take_errors(&self) -> Vec<ValidationIssue> {
        std::mem::take(&mut *self.inner.errors.lock())
    }

    /// Fail-fast view of the collected issues, for callers that want a
    /// hard error instead of inspecting the list.
    pub fn ensure_valid(&self) -> AttachResult<()> {
        let issues = self.inner.errors.lock().clone();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(AttachError::validation(issues))
        }
    }

    // Previous is only captured for the first reassignment after a save, so
    // `replace` deletes the persisted file, not an intermediate one.
    fn swap_current(&self, new: Option<FileRef>) {
        let mut slots = self.inner.slots.lock();
        let old = std::mem::replace(&mut slots.current, new);
        if slots.previous.is_none() {
            if let Some(old) = old {
                if slots.current.as_ref() != Some(&old) {
                    slots.previous = Some(old);
                }
            }
        }
    }

    /// Assign new content, a serialized reference, or nothing.
    ///
    /// Fresh content is uploaded to the cache tier and validated. On
    /// validation failure the upload is deleted, the issues are recorded on
    /// the attacher, and the slot is left unchanged; the call still returns
    /// `Ok` with the unchanged state.
    pub async fn assign(&self, input: AssignInput) -> AttachResult<AttachmentState> {
        match input {
            AssignInput::Clear => {
                self.swap_current(None);
                self.inner.errors.lock().clear();
            }
            AssignInput::Serialized(payload) => {
                let reference = self.class().serializer.deserialize(&payload)?;
                if !self.class().tiers.contains(reference.tier()) {
                    return Err(AttachError::unknown_tier(reference.tier()));
                }
                self.swap_current(Some(reference));
                self.inner.errors.lock().clear();
            }
            AssignInput::Stream { source, metadata } => {
                let cache_tier = self.class().cache_tier.clone();
                let ctx = self.op_context(Action::Cache, &cache_tier);

                let mut base = metadata;
                base.entry(meta::UPLOADED_AT.to_string())
                    .or_insert_with(|| MetadataValue::Text(Utc::now().to_rfc3339()));

                let cached = self
                    .class()
                    .uploader
                    .upload(source, &cache_tier, base, &ctx)
                    .await?;

                let mut issues = Vec::new();
                for validator in &self.class().validators {
                    issues.extend(validator.validate(&cached, &ctx).await);
                }
                if !issues.is_empty() {
                    debug!(
                        name = %self.inner.name,
                        count = issues.len(),
                        "assignment rejected by validation"
                    );
                    *self.inner.errors.lock() = issues;
                    self.delete_now(cached, Action::Cache).await?;
                    return Ok(self.state());
                }

                self.inner.errors.lock().clear();
                self.swap_current(Some(cached));
            }
        }
        Ok(self.state())
    }

    /// Move the current cached reference to the permanent tier.
    ///
    /// Runs through the promote dispatcher, so it may complete after this
    /// call returns. The new store copy is installed only if the slot still
    /// holds the reference that was promoted; a promotion that loses that
    /// compare-and-swap deletes its own store copy and reports success.
    pub async fn promote(&self) -> AttachResult<()> {
        let expected = {
            let slots = self.inner.slots.lock();
            match &slots.current {
                Some(r) if r.tier() == self.class().cache_tier => r.clone(),
                _ => return Ok(()),
            }
        };

        let this = self.clone();
        let task: Task = Box::pin(async move {
            match this.promote_now(expected).await {
                Err(AttachError::RaceLost) => Ok(()),
                other => other,
            }
        });
        self.class().promote_dispatch.dispatch(task).await
    }

    async fn promote_now(&self, expected: FileRef) -> AttachResult<()> {
        {
            let slots = self.inner.slots.lock();
            if slots.current.as_ref() != Some(&expected) {
                return Err(AttachError::RaceLost);
            }
        }

        let promoted = self.upload_to_store(&expected).await?;

        let won = {
            let mut slots = self.inner.slots.lock();
            if slots.current.as_ref() == Some(&expected) {
                slots.current = Some(promoted.clone());
                true
            } else {
                false
            }
        };

        if won {
            self.schedule_deletion(expected, Action::Promote).await;
            Ok(())
        } else {
            debug!(
                name = %self.inner.name,
                location = promoted.location(),
                "promotion superseded, discarding store copy"
            );
            self.schedule_deletion(promoted, Action::Promote).await;
            Err(AttachError::RaceLost)
        }
    }

    async fn upload_to_store(&self, cached: &FileRef) -> AttachResult<FileRef> {
        let class = self.class();
        let ctx = self.op_context(Action::Promote, &class.store_tier);

        // Rename bypasses the store interceptor chain, so it is only taken
        // when no interceptors are registered.
        if class.hooks.around_store.is_empty() {
            let cache_backend = class.tiers.get(&class.cache_tier)?;
            let store_backend = class.tiers.get(&class.store_tier)?;
            if let (Some(from), Some(to)) =
                (cache_backend.local_root(), store_backend.local_root())
            {
                // Rename consumes the cache bytes, so re-check the slot at
                // the last moment; a reassignment that raced in still owns
                // the superseded file until replace() runs.
                {
                    let slots = self.inner.slots.lock();
                    if slots.current.as_ref() != Some(cached) {
                        return Err(AttachError::RaceLost);
                    }
                }

                let mut locations = vec![cached.location().to_string()];
                locations.extend(cached.variant_locations().into_iter().map(str::to_string));
                for location in &locations {
                    let target = to.join(location);
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::rename(from.join(location), target).await?;
                }
                debug!(location = cached.location(), "promoted by rename");
                return Ok(FileRef::new(
                    class.store_tier.clone(),
                    cached.location(),
                    cached.metadata().clone(),
                ));
            }
        }

        class.uploader.copy_to(cached, &class.store_tier, &ctx).await
    }

    /// Delete the reference superseded by the last reassignment, if any.
    /// Called after the host record's save commits.
    pub async fn replace(&self) -> AttachResult<()> {
        let previous = {
            let mut slots = self.inner.slots.lock();
            match slots.previous.take() {
                Some(prev) if slots.current.as_ref() != Some(&prev) => Some(prev),
                _ => None,
            }
        };
        if let Some(prev) = previous {
            self.schedule_deletion(prev, Action::Replace).await;
        }
        Ok(())
    }

    /// Delete everything the slot references. Called when the host record
    /// is destroyed.
    pub async fn destroy(&self) -> AttachResult<()> {
        let (current, previous) = {
            let mut slots = self.inner.slots.lock();
            (slots.current.take(), slots.previous.take())
        };
        if let Some(prev) = previous {
            self.schedule_deletion(prev, Action::Destroy).await;
        }
        if let Some(cur) = current {
            self.schedule_deletion(cur, Action::Destroy).await;
        }
        Ok(())
    }

    /// Post-save step: promote a cached reference, then delete the
    /// superseded one.
    pub async fn finalize(&self) -> AttachResult<()> {
        self.promote().await?;
        self.replace().await
    }

    /// Re-run metadata extraction against the current file
    pub async fn refresh_metadata(&self) -> AttachResult<Option<FileRef>> {
        let current = match self.current() {
            Some(r) => r,
            None => return Ok(None),
        };
        let ctx = self.op_context(Action::Refresh, current.tier());
        let refreshed = self
            .class()
            .uploader
            .refresh_metadata(&current, &ctx)
            .await?;

        let mut slots = self.inner.slots.lock();
        if slots.current.as_ref() == Some(&current) {
            slots.current = Some(refreshed.clone());
        }
        Ok(Some(refreshed))
    }

    // Deletion failures never fail the parent operation: they are logged
    // and handed to the failure callback instead.
    async fn delete_now(&self, reference: FileRef, action: Action) -> AttachResult<()> {
        let ctx = self.op_context(action, reference.tier());
        if let Err(err) = self.class().uploader.delete(&reference, &ctx).await {
            warn!(
                tier = reference.tier(),
                location = reference.location(),
                error = %err,
                "attachment deletion failed"
            );
            (self.class().on_failure)(&err);
        }
        Ok(())
    }

    async fn schedule_deletion(&self, reference: FileRef, action: Action) {
        let this = self.clone();
        let task: Task = Box::pin(async move { this.delete_now(reference, action).await });
        if let Err(err) = self.class().delete_dispatch.dispatch(task).await {
            error!(error = %err, "could not dispatch attachment deletion");
            (self.class().on_failure)(&err);
        }
    }

    /// Serialized column value for the current reference, `None` when empty
    pub fn column_value(&self) -> AttachResult<Option<String>> {
        match self.current() {
            Some(r) => Ok(Some(self.class().serializer.serialize(&r)?)),
            None => Ok(None),
        }
    }

    /// Reset the slot from a persisted column value. Clears previous and
    /// any collected validation issues.
    pub fn load_from(&self, payload: Option<&str>) -> AttachResult<()> {
        let reference = match payload {
            Some(p) => {
                let r = self.class().serializer.deserialize(p)?;
                if !self.class().tiers.contains(r.tier()) {
                    return Err(AttachError::unknown_tier(r.tier()));
                }
                Some(r)
            }
            None => None,
        };
        {
            let mut slots = self.inner.slots.lock();
            slots.current = reference;
            slots.previous = None;
        }
        self.inner.errors.lock().clear();
        Ok(())
    }

    pub fn load(&self, record: &impl HostRecord) -> AttachResult<()> {
        let payload = record.attachment_column(&self.inner.name);
        self.load_from(payload.as_deref())
    }

    pub fn write_to(&self, record: &mut impl HostRecord) -> AttachResult<()> {
        record.set_attachment_column(&self.inner.name, self.column_value()?);
        Ok(())
    }

    /// URL for the current file, `None` when empty
    pub fn url(&self, options: &UrlOptions) -> AttachResult<Option<String>> {
        match self.current() {
            Some(r) => Ok(Some(r.url(self.class().tiers.as_ref(), options)?)),
            None => Ok(None),
        }
    }

    /// New attacher for a duplicated record: shares the class, copies the
    /// slot references (immutable values, so clones suffice), and starts
    /// with clean errors.
    pub fn clone_for_record(&self, record: serde_json::Value) -> Attacher {
        let slots = {
            let slots = self.inner.slots.lock();
            Slots {
                current: slots.current.clone(),
                previous: slots.previous.clone(),
            }
        };
        Attacher {
            inner: Arc::new(AttacherInner {
                class: self.inner.class.clone(),
                record,
                name: self.inner.name.clone(),
                slots: Mutex::new(slots),
                errors: Mutex::new(Vec::new()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, TierRegistry};
    use crate::types::content_from_bytes;

    fn test_class() -> Arc<AttachmentClass> {
        let tiers = Arc::new(
            TierRegistry::builder()
                .tier("cache", MemoryStorage::new())
                .tier("store", MemoryStorage::new())
                .build(),
        );
        AttachmentClass::builder(tiers).build().unwrap()
    }

    fn stream_input(data: &str) -> AssignInput {
        AssignInput::Stream {
            source: content_from_bytes(data.as_bytes().to_vec()),
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn assign_caches_and_reports_state() {
        let class = test_class();
        let attacher = class.attacher(serde_json::json!({"id": 1}), "avatar");

        let state = attacher.assign(stream_input("hello")).await.unwrap();

        match state {
            AttachmentState::Cached(r) => {
                assert_eq!(r.tier(), "cache");
                assert_eq!(r.size(), Some(5));
            }
            other => panic!("expected cached state, got {other:?}"),
        }
        assert!(attacher.previous().is_none());
    }

    #[tokio::test]
    async fn first_reassignment_captures_previous_once() {
        let class = test_class();
        let attacher = class.attacher(serde_json::Value::Null, "avatar");

        attacher.assign(stream_input("one")).await.unwrap();
        let first = attacher.current().unwrap();

        attacher.assign(stream_input("two")).await.unwrap();
        attacher.assign(stream_input("three")).await.unwrap();

        // Only the reference present before the first reassignment is kept
        assert_eq!(attacher.previous(), Some(first));
    }

    #[tokio::test]
    async fn clear_empties_the_slot() {
        let class = test_class();
        let attacher = class.attacher(serde_json::Value::Null, "avatar");

        attacher.assign(stream_input("data")).await.unwrap();
        let state = attacher.assign(AssignInput::Clear).await.unwrap();

        assert_eq!(state, AttachmentState::Empty);
        assert!(attacher.previous().is_some());
    }

    #[tokio::test]
    async fn reassigning_the_same_reference_is_idempotent() {
        let class = test_class();
        let attacher = class.attacher(serde_json::Value::Null, "avatar");

        attacher.assign(stream_input("data")).await.unwrap();
        let payload = attacher.column_value().unwrap().unwrap();
        attacher
            .assign(AssignInput::Serialized(payload))
            .await
            .unwrap();

        assert!(attacher.previous().is_none());
    }

    #[tokio::test]
    async fn build_rejects_unknown_tier_names() {
        let tiers = Arc::new(
            TierRegistry::builder()
                .tier("cache", MemoryStorage::new())
                .build(),
        );
        let result = AttachmentClass::builder(tiers).store_tier("missing").build();

        assert!(matches!(result, Err(AttachError::UnknownTier { .. })));
    }
}
