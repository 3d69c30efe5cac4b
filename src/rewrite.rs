//! Node mutation and transport hints.
//!
//! The only place an [`ImageNode`] changes. Lazy placeholders keep their
//! visible `src`; only `data-src` receives the artifact. Nodes handed to a
//! lazy loader that do get a variant set carry the real list in
//! `data-srcset`, and `srcset` gets a transparent SVG of the same natural
//! size so layout does not jump.

use crate::config::EngineConfig;
use crate::imaging::Dimensions;
use crate::types::{ImageNode, PreloadHint, ResolvedImage, ResourceKind};
use crate::variants::{VariantSet, svg_placeholder};
use md5::{Digest, Md5};

/// MD5 of a reference without its leading slashes, as lower-case hex.
pub fn reference_hash(reference: &str) -> String {
    format!("{:x}", Md5::digest(reference.trim_start_matches('/').as_bytes()))
}

fn hint(url: &str, remove_original: Option<String>) -> PreloadHint {
    PreloadHint {
        url: url.to_string(),
        kind: ResourceKind::Image,
        is_preload: false,
        remove_original,
    }
}

/// Whether the original reference itself stays as `src` of a variant set,
/// and so must keep its own hint.
fn keeps_original(config: &EngineConfig, responsive: bool) -> bool {
    responsive && config.variants.primary_label().is_none()
}

/// Hint for an artifact, dropping the hint registered for `original` unless
/// the original stays in use.
fn artifact_hint(url: &str, original: &str, keep_original: bool) -> PreloadHint {
    let remove = (!keep_original).then(|| reference_hash(original));
    hint(url, remove)
}

/// Point the node at its primary artifact. `responsive` is set when a
/// variant set follows.
pub fn apply_primary(
    node: &mut ImageNode,
    image: &ResolvedImage,
    url: &str,
    config: &EngineConfig,
    responsive: bool,
) -> Vec<PreloadHint> {
    if !image.already_lazy {
        node.src = Some(url.to_string());
    }
    if (config.lazy_load.process_data_src || image.already_lazy) && node.alt_src.is_some() {
        node.alt_src = Some(url.to_string());
    }

    let keep_original = keeps_original(config, responsive);
    let mut hints = Vec::new();
    if keep_original {
        hints.push(hint(&image.reference, None));
    }
    hints.push(artifact_hint(url, &image.reference, keep_original));
    hints
}

/// Drop any existing candidate list before a variant set replaces it.
pub fn clear_candidates(node: &mut ImageNode) {
    node.candidates = None;
    node.sizes = None;
}

/// Install a variant set on the node. Never called for lazy placeholders,
/// which keep their existing candidate list.
///
/// `src` follows the configured primary label, or returns to the original
/// reference when the label is `none`.
pub fn apply_variants(
    node: &mut ImageNode,
    image: &ResolvedImage,
    set: &VariantSet,
    natural: Dimensions,
    config: &EngineConfig,
) -> Vec<PreloadHint> {
    let src = match config.variants.primary_label() {
        Some(label) => set.get(label).map(|c| c.url.clone()),
        None => Some(image.reference.clone()),
    };
    if let Some(src) = src {
        if config.lazy_load.process_data_src && node.alt_src.is_some() {
            node.alt_src = Some(src.clone());
        }
        node.src = Some(src);
    }

    if let Some(srcset) = set.srcset() {
        if node.lazy_marker || node.alt_candidates.is_some() {
            node.alt_candidates = Some(srcset);
            node.candidates = Some(svg_placeholder(natural.width, natural.height));
        } else {
            node.candidates = Some(srcset);
        }
    }

    let keep_original = keeps_original(config, true);
    set.candidates
        .iter()
        .filter(|c| !c.original)
        .map(|c| artifact_hint(&c.url, &image.public_src, keep_original))
        .collect()
}
