//! Parameter types for image operations.
//!
//! These structs describe *what* to encode, not *how*. They are the
//! interface between [`operations`](super::operations), which decides the
//! dimensions and format, and the [`backend`](super::backend), which does
//! the pixel work. Tests swap in a recording mock without touching the
//! operation logic.

use super::calculations::png_compression_level;
use crate::types::TargetFormat;
use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// zlib-style level for PNG, where higher quality means less compression.
    pub fn png_level(self) -> u8 {
        png_compression_level(self.0)
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(70)
    }
}

/// Everything one transcode needs: decode `source`, resample to
/// `width`×`height`, encode as `format`.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeParams {
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
    pub format: TargetFormat,
    pub quality: Quality,
}
