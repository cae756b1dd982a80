//! Upload and deletion pipeline.
//!
//! `upload` validates nothing about the bytes themselves; validation rules
//! run on the attacher against the resulting reference. What the pipeline
//! guarantees is ordering: process hooks, the processor, store hooks,
//! location generation, metadata extraction, and the backend put compose in
//! a fixed sequence, each step wrapped by its around chain.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncSeekExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AttachError, AttachResult};
use crate::hooks::{run_effects, HookRegistry, Next, OpFuture, Terminal};
use crate::storage::{Storage, TierRegistry};
use crate::types::{meta, ContentStream, FileRef, Metadata, MetadataValue, OpContext};

/// Outcome of the processing step
pub enum Processed {
    /// Use the input unchanged
    Passthrough(ContentStream),
    /// Persist a transformed stream instead of the input
    Replaced(ContentStream),
    /// Persist several named variants; the first entry is the primary,
    /// the rest are stored under derived locations
    Variants(BTreeMap<String, ContentStream>),
}

/// Optional transform step between upload input and storage
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, source: ContentStream, ctx: &OpContext) -> AttachResult<Processed>;
}

/// Pure metadata extraction over a rewound stream. Extractors compose:
/// results merge left-to-right in registration order, and `None`
/// contributes nothing.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(
        &self,
        source: &mut ContentStream,
        ctx: &OpContext,
    ) -> AttachResult<Option<Metadata>>;
}

/// Records the byte size of the source
pub struct SizeExtractor;

#[async_trait]
impl MetadataExtractor for SizeExtractor {
    async fn extract(
        &self,
        source: &mut ContentStream,
        _ctx: &OpContext,
    ) -> AttachResult<Option<Metadata>> {
        let size = source.seek(SeekFrom::End(0)).await?;
        source.rewind().await?;

        let mut metadata = Metadata::new();
        metadata.insert(meta::SIZE.to_string(), MetadataValue::Number(size as f64));
        Ok(Some(metadata))
    }
}

/// Strategy for generating storage locations
pub trait LocationStrategy: Send + Sync {
    /// Location for a new upload. Must not collide across concurrent
    /// uploads unless deliberately overridden.
    fn generate(&self, metadata: &Metadata, ctx: &OpContext) -> String;

    /// Location for a derived variant of a stored file
    fn variant(&self, base: &str, name: &str) -> String {
        format!("{base}.{name}")
    }
}

/// Default strategy: a random token from a secure source, extended with the
/// source filename's extension when one is known.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomLocation;

impl LocationStrategy for RandomLocation {
    fn generate(&self, metadata: &Metadata, _ctx: &OpContext) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let extension = metadata
            .get(meta::FILENAME)
            .and_then(MetadataValue::as_str)
            .and_then(|name| std::path::Path::new(name).extension())
            .and_then(|ext| ext.to_str());

        match extension {
            Some(ext) => format!("{token}.{ext}"),
            None => token,
        }
    }
}

/// A variant stream bound for a derived location
pub struct VariantUpload {
    pub name: String,
    pub location: String,
    pub source: ContentStream,
}

/// Everything the store step needs; flows through the around_store chain
pub struct StoreRequest {
    pub tier: String,
    pub location: String,
    pub source: ContentStream,
    pub metadata: Metadata,
    pub variants: Vec<VariantUpload>,
}

struct ProcessTerminal {
    processor: Option<Arc<dyn Processor>>,
}

impl Terminal<ContentStream, Processed> for ProcessTerminal {
    fn call<'a>(&'a self, source: ContentStream, ctx: &'a OpContext) -> OpFuture<'a, Processed>
    where
        ContentStream: 'a,
        Processed: 'a,
    {
        match &self.processor {
            Some(processor) => {
                let processor = processor.clone();
                Box::pin(async move { processor.process(source, ctx).await })
            }
            None => Box::pin(async move { Ok(Processed::Passthrough(source)) }),
        }
    }
}

struct StoreTerminal {
    backend: Arc<dyn Storage>,
}

impl Terminal<StoreRequest, FileRef> for StoreTerminal {
    fn call<'a>(&'a self, mut request: StoreRequest, _ctx: &'a OpContext) -> OpFuture<'a, FileRef>
    where
        StoreRequest: 'a,
        FileRef: 'a,
    {
        Box::pin(async move {
            let result = self
                .backend
                .put(&request.location, &mut request.source, &request.metadata)
                .await?;
            request.metadata.insert(
                meta::SIZE.to_string(),
                MetadataValue::Number(result.size as f64),
            );

            for mut variant in request.variants {
                self.backend
                    .put(&variant.location, &mut variant.source, &request.metadata)
                    .await?;
            }

            Ok(FileRef::new(request.tier, request.location, request.metadata))
        })
    }
}

struct DeleteTerminal {
    tiers: Arc<TierRegistry>,
}

impl Terminal<FileRef, FileRef> for DeleteTerminal {
    fn call<'a>(&'a self, reference: FileRef, _ctx: &'a OpContext) -> OpFuture<'a, FileRef>
    where
        FileRef: 'a,
    {
        Box::pin(async move {
            let backend = self.tiers.get(reference.tier())?;

            let mut locations = vec![reference.location().to_string()];
            locations.extend(
                reference
                    .variant_locations()
                    .into_iter()
                    .map(str::to_string),
            );
            backend.multi_delete(&locations).await?;

            Ok(reference)
        })
    }
}

/// The upload/deletion pipeline for one attachment class
pub struct Uploader {
    tiers: Arc<TierRegistry>,
    hooks: Arc<HookRegistry>,
    processor: Option<Arc<dyn Processor>>,
    extractors: Vec<Arc<dyn MetadataExtractor>>,
    locations: Arc<dyn LocationStrategy>,
}

impl Uploader {
    pub(crate) fn new(
        tiers: Arc<TierRegistry>,
        hooks: Arc<HookRegistry>,
        processor: Option<Arc<dyn Processor>>,
        extractors: Vec<Arc<dyn MetadataExtractor>>,
        locations: Arc<dyn LocationStrategy>,
    ) -> Self {
        Self {
            tiers,
            hooks,
            processor,
            extractors,
            locations,
        }
    }

    pub fn tiers(&self) -> &Arc<TierRegistry> {
        &self.tiers
    }

    /// Upload a content source into a tier, producing a [`FileRef`].
    ///
    /// `base` seeds the metadata map (filename, mime type, timestamps);
    /// extractor results merge over it, later extractors winning.
    pub async fn upload(
        &self,
        source: ContentStream,
        tier: &str,
        base: Metadata,
        ctx: &OpContext,
    ) -> AttachResult<FileRef> {
        let backend = self.tiers.get(tier)?;

        run_effects(&self.hooks.before_process, ctx).await?;
        let terminal = ProcessTerminal {
            processor: self.processor.clone(),
        };
        let processed = Next::new(&self.hooks.around_process, &terminal)
            .run(source, ctx)
            .await?;
        run_effects(&self.hooks.after_process, ctx).await?;

        run_effects(&self.hooks.before_store, ctx).await?;

        let (mut primary, variants) = split_processed(processed)?;

        let mut metadata = base;
        let location = self.locations.generate(&metadata, ctx);

        let mut variant_uploads = Vec::with_capacity(variants.len());
        for (name, variant_source) in variants {
            let variant_location = self.locations.variant(&location, &name);
            metadata.insert(
                format!("{}{name}", meta::VARIANT_PREFIX),
                MetadataValue::Text(variant_location.clone()),
            );
            variant_uploads.push(VariantUpload {
                name,
                location: variant_location,
                source: variant_source,
            });
        }

        for extractor in &self.extractors {
            primary.rewind().await?;
            if let Some(extra) = extractor.extract(&mut primary, ctx).await? {
                metadata.extend(extra);
            }
        }
        primary.rewind().await?;

        let request = StoreRequest {
            tier: tier.to_string(),
            location,
            source: primary,
            metadata,
            variants: variant_uploads,
        };
        let terminal = StoreTerminal { backend };
        let stored = Next::new(&self.hooks.around_store, &terminal)
            .run(request, ctx)
            .await?;

        run_effects(&self.hooks.after_store, ctx).await?;
        debug!(tier, location = stored.location(), "uploaded attachment");
        Ok(stored)
    }

    /// Copy a stored file (and its variants) into another tier under a
    /// fresh location, running the store hook chain but not the processor.
    /// Promotion uses this so already-processed content is not processed
    /// twice.
    pub async fn copy_to(
        &self,
        reference: &FileRef,
        tier: &str,
        ctx: &OpContext,
    ) -> AttachResult<FileRef> {
        let backend = self.tiers.get(tier)?;
        let origin = self.tiers.get(reference.tier())?;

        run_effects(&self.hooks.before_store, ctx).await?;

        let mut metadata = reference.metadata().clone();
        let recorded_variants: Vec<(String, String)> = metadata
            .iter()
            .filter(|(key, _)| key.starts_with(meta::VARIANT_PREFIX))
            .filter_map(|(key, value)| {
                value
                    .as_str()
                    .map(|loc| (key[meta::VARIANT_PREFIX.len()..].to_string(), loc.to_string()))
            })
            .collect();

        let source = origin.open(reference.location()).await?;
        let location = self.locations.generate(&metadata, ctx);

        let mut variants = Vec::with_capacity(recorded_variants.len());
        for (name, old_location) in recorded_variants {
            let variant_source = origin.open(&old_location).await?;
            let variant_location = self.locations.variant(&location, &name);
            metadata.insert(
                format!("{}{name}", meta::VARIANT_PREFIX),
                MetadataValue::Text(variant_location.clone()),
            );
            variants.push(VariantUpload {
                name,
                location: variant_location,
                source: variant_source,
            });
        }

        let request = StoreRequest {
            tier: tier.to_string(),
            location,
            source,
            metadata,
            variants,
        };
        let terminal = StoreTerminal { backend };
        let stored = Next::new(&self.hooks.around_store, &terminal)
            .run(request, ctx)
            .await?;

        run_effects(&self.hooks.after_store, ctx).await?;
        debug!(
            from = reference.tier(),
            tier,
            location = stored.location(),
            "copied attachment"
        );
        Ok(stored)
    }

    /// Delete a stored file (and any recorded variants), wrapped by the
    /// delete hook chain. Idempotent at the backend level.
    pub async fn delete(&self, reference: &FileRef, ctx: &OpContext) -> AttachResult<FileRef> {
        run_effects(&self.hooks.before_delete, ctx).await?;

        let terminal = DeleteTerminal {
            tiers: self.tiers.clone(),
        };
        let deleted = Next::new(&self.hooks.around_delete, &terminal)
            .run(reference.clone(), ctx)
            .await?;

        run_effects(&self.hooks.after_delete, ctx).await?;
        debug!(
            tier = deleted.tier(),
            location = deleted.location(),
            "deleted attachment"
        );
        Ok(deleted)
    }

    /// Re-run metadata extraction against a stored file, producing a new
    /// reference with copied-and-extended metadata.
    pub async fn refresh_metadata(
        &self,
        reference: &FileRef,
        ctx: &OpContext,
    ) -> AttachResult<FileRef> {
        let mut source = reference.open(&self.tiers).await?;

        let mut extra = Metadata::new();
        for extractor in &self.extractors {
            source.rewind().await?;
            if let Some(found) = extractor.extract(&mut source, ctx).await? {
                extra.extend(found);
            }
        }

        Ok(reference.with_metadata(extra))
    }
}

fn split_processed(
    processed: Processed,
) -> AttachResult<(ContentStream, Vec<(String, ContentStream)>)> {
    match processed {
        Processed::Passthrough(source) | Processed::Replaced(source) => Ok((source, Vec::new())),
        Processed::Variants(map) => {
            let mut entries = map.into_iter();
            match entries.next() {
                Some((_, primary)) => Ok((primary, entries.collect())),
                None => Err(AttachError::invalid_result(
                    "processor returned an empty variant map",
                )),
            }
        }
    }
}
