//! Per-node pipeline.
//!
//! Wires the stages together for one image node:
//!
//! ```text
//! resolve → negotiate → key → lookup ─┬─ Fresh ────────────────┐
//!                                     ├─ Negative → done       │
//!                                     └─ Stale/Absent          │
//!                                          → remote | transcode│
//!                                          → persist ──────────┴→ rewrite → [variants ×4] → done
//! ```
//!
//! Every failure is local to the node: the node keeps its original markup,
//! the report says why, and sibling nodes carry on. A primary artifact that
//! cannot beat its source leaves a negative marker so later renders skip it
//! without decoding anything.
//!
//! With responsive variants enabled the primary runs first at the variant
//! start settings (the "pre-variant" image), then the four cascaded variants
//! run through the same single-artifact path, see [`variants`](crate::variants).

use crate::cache::{CacheError, CacheStats, CacheStore, Lookup};
use crate::config::EngineConfig;
use crate::format::negotiate;
use crate::imaging::{ImageBackend, TranscodeError, transcode};
use crate::naming::{CacheKey, build_key};
use crate::remote::{Fetcher, HttpFetcher, RemoteError, RemoteOptimizer};
use crate::resolve::{SkipReason, resolve};
use crate::rewrite;
use crate::types::{
    ImageNode, PreloadHint, RequestContext, ResolvedImage, TargetFormat, TransformRequest,
};
use crate::variants::{self, ArtifactProducer};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Why a node was left untouched.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("skipped: {0}")]
    Skipped(#[from] SkipReason),
    #[error("no output format for .{0} sources")]
    UnsupportedFormat(String),
    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),
    #[error("remote optimizer failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),
}

impl NodeError {
    /// Policy skips are expected; everything else is a failure worth a warning.
    pub fn is_skip(&self) -> bool {
        matches!(self, NodeError::Skipped(_))
    }
}

/// Result of producing one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Produced {
    Artifact {
        url: String,
        /// Pixel width; always known for variants.
        width: Option<u32>,
        cached: bool,
    },
    /// A sticky negative marker exists or was just written.
    Negative,
    /// Nothing smaller could be made; the caller keeps the original source.
    Original { width: u32 },
}

/// What happened to one node.
#[derive(Debug)]
pub enum NodeOutcome {
    /// `src` now points at the primary artifact.
    Rewritten { url: String, cached: bool },
    /// Primary plus a responsive candidate list.
    Responsive {
        src: Option<String>,
        candidates: usize,
        failed: usize,
        cached: bool,
    },
    /// Known not to improve; node untouched, still a success.
    Negative,
    NotProcessed(NodeError),
}

/// Per-node report handed back to the page optimizer.
#[derive(Debug)]
pub struct NodeReport {
    /// The `src` attribute as it was before processing.
    pub src: String,
    pub outcome: NodeOutcome,
    pub hints: Vec<PreloadHint>,
}

impl NodeReport {
    pub fn record(&self, stats: &mut CacheStats) {
        match &self.outcome {
            NodeOutcome::Rewritten { cached: true, .. }
            | NodeOutcome::Responsive { cached: true, .. } => stats.hit(),
            NodeOutcome::Rewritten { .. } | NodeOutcome::Responsive { .. } => stats.generated(),
            NodeOutcome::Negative => stats.negative(),
            NodeOutcome::NotProcessed(e) if e.is_skip() => stats.skipped(),
            NodeOutcome::NotProcessed(_) => stats.failed(),
        }
    }
}

/// What the pipeline would do with one reference, without producing anything.
#[derive(Debug)]
pub struct CheckReport {
    pub image: ResolvedImage,
    pub format: TargetFormat,
    pub key: CacheKey,
    pub url: String,
    pub lookup: Lookup,
}

/// The engine: configuration, a pixel backend, the artifact cache and an
/// optional remote optimizer.
pub struct ImageOptimizer<'a, B: ImageBackend, F: Fetcher = HttpFetcher> {
    config: &'a EngineConfig,
    backend: &'a B,
    store: CacheStore,
    remote: Option<RemoteOptimizer<F>>,
}

impl<'a, B: ImageBackend> ImageOptimizer<'a, B, HttpFetcher> {
    pub fn new(config: &'a EngineConfig, backend: &'a B) -> Self {
        Self::with_fetcher(config, backend, HttpFetcher::from_config(config))
    }
}

impl<'a, B: ImageBackend, F: Fetcher> ImageOptimizer<'a, B, F> {
    pub fn with_fetcher(config: &'a EngineConfig, backend: &'a B, fetcher: F) -> Self {
        Self {
            config,
            backend,
            store: CacheStore::from_config(config),
            remote: config
                .remote
                .enabled
                .then(|| RemoteOptimizer::new(fetcher, config)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Create the cache directory. Failure is logged at error level; the
    /// caller should then leave the whole page alone.
    pub fn prepare(&self) -> Result<(), CacheError> {
        self.store.ensure_dir().inspect_err(|e| error!("{e}"))
    }

    /// Resolve, negotiate and look up the primary artifact for `node`.
    /// Nothing is decoded or written.
    pub fn check(&self, node: &ImageNode, ctx: &RequestContext) -> Result<CheckReport, NodeError> {
        let image = resolve(&node.reference(), self.config)?;
        let format = self.target_format(&image, ctx)?;
        let responsive = self.config.variants.enabled && !image.already_lazy;
        let request = self.primary_request(format, responsive);
        let key = build_key(&image, &request, self.config.cache.naming);
        let lookup = self.store.lookup(&key, &image.path, false);
        Ok(CheckReport {
            url: self.store.url_for(&key),
            image,
            format,
            key,
            lookup,
        })
    }

    /// Run the full pipeline for one node, mutating it on success.
    pub fn process_node(&self, node: &mut ImageNode, ctx: &RequestContext) -> NodeReport {
        self.process(node, ctx, self.config.variants.enabled)
    }

    /// Like [`process_node`](Self::process_node), but never builds a
    /// variant set. Used for CSS backgrounds.
    pub fn process_single(&self, node: &mut ImageNode, ctx: &RequestContext) -> NodeReport {
        self.process(node, ctx, false)
    }

    fn process(&self, node: &mut ImageNode, ctx: &RequestContext, responsive: bool) -> NodeReport {
        let src = node.src.clone().unwrap_or_default();
        let mut hints = Vec::new();

        let mut working = node.clone();
        let outcome = match self.run(&mut working, ctx, responsive, &mut hints) {
            Ok(outcome) => {
                *node = working;
                outcome
            }
            Err(e) => {
                if e.is_skip() {
                    debug!(%src, "{e}");
                } else {
                    warn!(%src, "{e}");
                }
                hints.clear();
                NodeOutcome::NotProcessed(e)
            }
        };

        NodeReport {
            src,
            outcome,
            hints,
        }
    }

    fn run(
        &self,
        node: &mut ImageNode,
        ctx: &RequestContext,
        responsive: bool,
        hints: &mut Vec<PreloadHint>,
    ) -> Result<NodeOutcome, NodeError> {
        let reference = node.reference();
        let image = resolve(&reference, self.config)?;
        // Lazy placeholders only get their data-src swapped.
        let responsive = responsive && !image.already_lazy;
        let format = self.target_format(&image, ctx)?;
        let explicit = reference.explicit_dimensions();
        let primary = self.primary_request(format, responsive);

        let cached = match self.produce(&image, explicit, &primary)? {
            Produced::Negative => return Ok(NodeOutcome::Negative),
            Produced::Artifact { url, cached, .. } => {
                hints.extend(rewrite::apply_primary(node, &image, &url, self.config, responsive));
                if !responsive {
                    return Ok(NodeOutcome::Rewritten { url, cached });
                }
                cached
            }
            // Only the pre-variant primary falls back; the variant set follows.
            Produced::Original { .. } => false,
        };

        rewrite::clear_candidates(node);
        let natural = self.backend.identify(&image.path).map_err(TranscodeError::from)?;
        let requests = variants::variant_requests(&self.config.variants, format);
        let set = variants::generate_variants(self, &image, explicit, &requests);
        hints.extend(rewrite::apply_variants(node, &image, &set, natural, self.config));

        Ok(NodeOutcome::Responsive {
            src: node.src.clone(),
            candidates: set.candidates.len(),
            failed: set.failures.len(),
            cached,
        })
    }

    fn target_format(
        &self,
        image: &ResolvedImage,
        ctx: &RequestContext,
    ) -> Result<TargetFormat, NodeError> {
        negotiate(
            &image.extension,
            &self.config.formats,
            self.backend.encoders(),
            ctx.browser,
        )
        .ok_or_else(|| NodeError::UnsupportedFormat(image.extension.clone()))
    }

    /// The primary image runs at the cascade start when a variant set follows.
    fn primary_request(&self, format: TargetFormat, responsive: bool) -> TransformRequest {
        if responsive {
            TransformRequest {
                quality: self.config.variants.start_quality,
                resize: self.config.variants.start_resize,
                format,
                variant: None,
                pre_variant: true,
            }
        } else {
            TransformRequest {
                quality: self.config.quality,
                resize: self.config.resize.factor,
                format,
                variant: None,
                pre_variant: false,
            }
        }
    }

    fn artifact_width(
        &self,
        path: &Path,
        request: &TransformRequest,
    ) -> Result<Option<u32>, NodeError> {
        if !request.is_variant() {
            return Ok(None);
        }
        let dims = self.backend.identify(path).map_err(TranscodeError::from)?;
        Ok(Some(dims.width))
    }

    fn generate(
        &self,
        image: &ResolvedImage,
        explicit: Option<(u32, u32)>,
        request: &TransformRequest,
    ) -> Result<(Vec<u8>, Option<u32>), NodeError> {
        let Some(remote) = &self.remote else {
            let out = transcode(self.backend, image, request, explicit, self.config)?;
            return Ok((out.bytes, Some(out.width)));
        };

        let bytes = remote.optimize(image, request.quality)?;
        if bytes.is_empty() {
            return Err(RemoteError::ServiceFailure("empty artifact".into()).into());
        }
        let original = std::fs::metadata(&image.path)
            .map_err(TranscodeError::from)?
            .len();
        let artifact = bytes.len() as u64;
        if artifact >= original {
            return Err(TranscodeError::NoReduction { artifact, original }.into());
        }
        Ok((bytes, None))
    }
}

impl<B: ImageBackend, F: Fetcher> ArtifactProducer for ImageOptimizer<'_, B, F> {
    fn produce(
        &self,
        image: &ResolvedImage,
        explicit: Option<(u32, u32)>,
        request: &TransformRequest,
    ) -> Result<Produced, NodeError> {
        let key = build_key(image, request, self.config.cache.naming);

        match self.store.lookup(&key, &image.path, request.is_variant()) {
            Lookup::Negative(_) => {
                debug!(%key, "negative marker, leaving source alone");
                return Ok(Produced::Negative);
            }
            Lookup::Fresh(entry) => {
                debug!(%key, "cache hit");
                let width = self.artifact_width(&entry.path, request)?;
                return Ok(Produced::Artifact {
                    url: entry.url,
                    width,
                    cached: true,
                });
            }
            Lookup::Stale(_) | Lookup::Absent => {}
        }

        match self.generate(image, explicit, request) {
            Ok((bytes, width)) => {
                let entry = self.store.persist(&key, &bytes)?;
                let width = match width {
                    Some(w) => Some(w),
                    None => self.artifact_width(&entry.path, request)?,
                };
                info!(%key, bytes = entry.size, "generated");
                Ok(Produced::Artifact {
                    url: entry.url,
                    width,
                    cached: false,
                })
            }
            Err(NodeError::Transcode(TranscodeError::NoReduction { artifact, original })) => {
                debug!(%key, artifact, original, "no reduction");
                if request.falls_back_to_original() {
                    let natural = self.backend.identify(&image.path).map_err(TranscodeError::from)?;
                    Ok(Produced::Original {
                        width: natural.width,
                    })
                } else {
                    self.store.mark_negative(&key)?;
                    Ok(Produced::Negative)
                }
            }
            Err(NodeError::Transcode(TranscodeError::BelowMinWidth { width, min })) => {
                Err(SkipReason::BelowMinWidth { width, min }.into())
            }
            Err(e) => Err(e),
        }
    }
}
