//! Shared types passed between pipeline stages.
//!
//! An [`ImageNode`] is the typed stand-in for one `<img>` element. The
//! pipeline captures an immutable [`ImageReference`] from it, resolves that
//! to a [`ResolvedImage`], and describes each artifact it wants with a
//! [`TransformRequest`]. Only the [`rewrite`](crate::rewrite) module
//! mutates the node.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One image element, with the attributes the engine reads or writes.
///
/// Attributes the engine does not understand are kept by the caller (see
/// [`html`](crate::html)) and never pass through here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageNode {
    /// `src`
    pub src: Option<String>,
    /// `data-src`, the real source of a lazy-loaded image.
    pub alt_src: Option<String>,
    /// `srcset`
    pub candidates: Option<String>,
    /// `data-srcset`
    pub alt_candidates: Option<String>,
    /// `sizes`
    pub sizes: Option<String>,
    /// Raw `width` attribute value.
    pub width: Option<String>,
    /// Raw `height` attribute value.
    pub height: Option<String>,
    /// `class`
    pub class: Option<String>,
    /// The node carries the lazy-load marker attribute.
    pub lazy_marker: bool,
}

impl ImageNode {
    pub fn with_src(src: impl Into<String>) -> Self {
        Self {
            src: Some(src.into()),
            ..Self::default()
        }
    }

    /// Capture the immutable reference the resolver works from.
    pub fn reference(&self) -> ImageReference {
        ImageReference {
            src: self.src.clone().unwrap_or_default(),
            width: self.width.as_deref().and_then(parse_pixels),
            height: self.height.as_deref().and_then(parse_pixels),
            classes: self.class.clone().unwrap_or_default(),
            lazy_marker: self.lazy_marker,
            alt_src: self.alt_src.clone(),
        }
    }
}

/// Parse an explicit dimension. Only pixel units count: `"300px"` → 300,
/// while `"300"`, `"50%"` and `"10em"` are ignored.
pub fn parse_pixels(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    let number = trimmed.strip_suffix("px")?.trim();
    number
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n as u32)
}

/// Immutable snapshot of an image node's relevant attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub src: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub classes: String,
    pub lazy_marker: bool,
    pub alt_src: Option<String>,
}

impl ImageReference {
    /// Explicit dimensions, only when both are set.
    pub fn explicit_dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width?, self.height?))
    }
}

/// A reference that passed resolution and exclusion policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Canonical filesystem path of the source image.
    pub path: PathBuf,
    /// The string hashed into cache keys (query string included).
    pub reference: String,
    /// Query-stripped source as it appeared in the markup.
    pub public_src: String,
    /// Lower-case source extension.
    pub extension: String,
    /// The node was a lazy-load placeholder; its visible `src` stays put.
    pub already_lazy: bool,
}

impl ResolvedImage {
    /// File stem of the public source, used by the `partial` and `none`
    /// naming policies.
    pub fn stem(&self) -> &str {
        let name = self.public_src.rsplit('/').next().unwrap_or(&self.public_src);
        match name.rfind('.') {
            Some(0) | None => name,
            Some(dot) => &name[..dot],
        }
    }
}

/// Encodings the engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Jpg,
    Png,
    Webp,
    Avif,
}

impl TargetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Jpg => "jpg",
            TargetFormat::Png => "png",
            TargetFormat::Webp => "webp",
            TargetFormat::Avif => "avif",
        }
    }

    /// Formats whose canvas starts transparent.
    pub fn supports_alpha(self) -> bool {
        match self {
            TargetFormat::Jpg => false,
            TargetFormat::Png | TargetFormat::Webp | TargetFormat::Avif => true,
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Label of a responsive variant: `4x` (largest) down to `1x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantLabel(u8);

impl VariantLabel {
    /// Number of variants in a responsive set.
    pub const COUNT: u8 = 4;

    /// Label for a cascade iteration: 0 → `4x`, 3 → `1x`.
    pub fn for_iteration(iteration: u8) -> Option<Self> {
        (iteration < Self::COUNT).then(|| Self(Self::COUNT - iteration))
    }

    /// Parse `"4x"` … `"1x"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let n: u8 = raw.trim().strip_suffix('x')?.parse().ok()?;
        (1..=Self::COUNT).contains(&n).then_some(Self(n))
    }

    pub fn multiplier(self) -> u8 {
        self.0
    }

    pub fn iteration(self) -> u8 {
        Self::COUNT - self.0
    }
}

impl fmt::Display for VariantLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

/// What to produce for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformRequest {
    /// Encoding quality, 0–100.
    pub quality: u32,
    /// Percentage of the working dimensions.
    pub resize: u32,
    pub format: TargetFormat,
    /// `None` for the primary image.
    pub variant: Option<VariantLabel>,
    /// Full-size primary kept as the base of a variant set.
    pub pre_variant: bool,
}

impl TransformRequest {
    pub fn is_variant(&self) -> bool {
        self.variant.is_some()
    }

    /// Variants and the pre-variant primary fall back to the original
    /// instead of being marked negative.
    pub fn falls_back_to_original(&self) -> bool {
        self.variant.is_some() || self.pre_variant
    }
}

/// Coarse browser family, classified outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
    Edge,
    InternetExplorer,
    OperaMini,
    #[default]
    Other,
}

/// Per-request facts supplied by the host application.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub browser: Browser,
    /// The request comes from an automated crawler.
    pub is_bot: bool,
    /// URL of the page being rendered.
    pub page_url: Option<String>,
}

/// Kind of resource named in a transport hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Image,
}

/// Entry for the external transport-hint registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreloadHint {
    pub url: String,
    pub kind: ResourceKind,
    pub is_preload: bool,
    /// MD5 of the original reference to drop from a separate preload list.
    pub remove_original: Option<String>,
}
