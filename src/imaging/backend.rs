//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the operations every backend must
//! support: identify, transcode, and report which encoders it carries.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests use the recording [`tests::MockBackend`].

use super::params::TranscodeParams;
use crate::format::EncoderSupport;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
pub trait ImageBackend: Sync {
    /// Natural pixel dimensions of an image on disk.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Decode, resample and encode; returns the encoded bytes.
    fn transcode(&self, params: &TranscodeParams) -> Result<Vec<u8>, BackendError>;

    /// Encoders compiled into this backend.
    fn encoders(&self) -> EncoderSupport;
}
