//! Target format negotiation.
//!
//! The default mapping keeps the source family: JPEG-like sources become
//! JPEG, PNG stays PNG and GIF (when enabled) becomes PNG. Two global
//! overrides can replace it, AVIF first, then WebP. Each needs its config
//! switch, an encoder compiled into the backend, and a client that is not
//! on the format's deny-list.

use crate::config::FormatsConfig;
use crate::types::{Browser, TargetFormat};

/// Encoders available at runtime, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSupport {
    pub webp: bool,
    pub avif: bool,
}

impl EncoderSupport {
    pub fn all() -> Self {
        Self {
            webp: true,
            avif: true,
        }
    }

    pub fn none() -> Self {
        Self {
            webp: false,
            avif: false,
        }
    }
}

/// Source extensions re-encoded as JPEG.
const JPEG_FAMILY: &[&str] = &["jpg", "jpeg", "bmp", "tif", "tiff"];

/// Map a source extension to its default output format.
///
/// Returns `None` for extensions outside the supported raster set, and for
/// GIF unless `gif_enabled`.
pub fn default_format(extension: &str, gif_enabled: bool) -> Option<TargetFormat> {
    match extension {
        ext if JPEG_FAMILY.contains(&ext) => Some(TargetFormat::Jpg),
        "png" => Some(TargetFormat::Png),
        "gif" if gif_enabled => Some(TargetFormat::Png),
        _ => None,
    }
}

fn avif_blocked(browser: Browser, config: &FormatsConfig) -> bool {
    match browser {
        Browser::InternetExplorer | Browser::Edge | Browser::OperaMini => true,
        Browser::Safari => config.exclude_safari,
        Browser::Chrome | Browser::Firefox | Browser::Other => false,
    }
}

fn webp_blocked(browser: Browser, config: &FormatsConfig) -> bool {
    match browser {
        Browser::InternetExplorer => true,
        Browser::Safari => config.exclude_safari,
        Browser::Chrome | Browser::Firefox | Browser::Edge | Browser::OperaMini | Browser::Other => {
            false
        }
    }
}

/// Pick the output format for a source extension, or `None` if unsupported.
pub fn negotiate(
    extension: &str,
    config: &FormatsConfig,
    encoders: EncoderSupport,
    browser: Browser,
) -> Option<TargetFormat> {
    let default = default_format(extension, config.gif)?;

    if config.avif && encoders.avif && !avif_blocked(browser, config) {
        return Some(TargetFormat::Avif);
    }
    if config.webp && encoders.webp && !webp_blocked(browser, config) {
        return Some(TargetFormat::Webp);
    }
    Some(default)
}
