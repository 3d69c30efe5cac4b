//! High-level image operations.
//!
//! [`transcode`] combines the dimension calculations with a backend call
//! and enforces the one guarantee every artifact must meet: it is strictly
//! smaller than its source.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::{scale_dimensions, working_dimensions};
use super::params::{Quality, TranscodeParams};
use crate::config::EngineConfig;
use crate::types::{ResolvedImage, TransformRequest};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("cannot decode source: {0}")]
    Decode(String),
    #[error("cannot encode artifact: {0}")]
    Encode(String),
    #[error("artifact is {artifact} bytes, source is {original} bytes")]
    NoReduction { artifact: u64, original: u64 },
    #[error("{width}px wide, below the {min}px processing minimum")]
    BelowMinWidth { width: u32, min: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BackendError> for TranscodeError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Io(e) => TranscodeError::Io(e),
            BackendError::Decode(msg) => TranscodeError::Decode(msg),
            BackendError::Encode(msg) => TranscodeError::Encode(msg),
        }
    }
}

/// An encoded artifact, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcoded {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Natural dimensions of the source.
    pub natural: Dimensions,
}

/// Plan the encode for one request without executing it.
///
/// Fails with `BelowMinWidth` for primaries narrower than the processing
/// minimum, and with `Encode` when scaling collapses an edge to zero.
pub fn plan_transcode(
    image: &ResolvedImage,
    request: &TransformRequest,
    natural: Dimensions,
    explicit: Option<(u32, u32)>,
    config: &EngineConfig,
) -> Result<TranscodeParams, TranscodeError> {
    let (mut width, mut height) = working_dimensions(natural, explicit);

    if !request.is_variant() && width < config.processing.min_width {
        return Err(TranscodeError::BelowMinWidth {
            width,
            min: config.processing.min_width,
        });
    }

    if config.resize_active()
        && (width >= config.resize.min_width || request.falls_back_to_original())
    {
        (width, height) = scale_dimensions((width, height), request.resize);
    }

    if width == 0 || height == 0 {
        return Err(TranscodeError::Encode(format!(
            "empty canvas {width}x{height}"
        )));
    }

    Ok(TranscodeParams {
        source: image.path.clone(),
        width,
        height,
        format: request.format,
        quality: Quality::new(request.quality),
    })
}

/// Produce the artifact bytes for one request.
pub fn transcode(
    backend: &impl ImageBackend,
    image: &ResolvedImage,
    request: &TransformRequest,
    explicit: Option<(u32, u32)>,
    config: &EngineConfig,
) -> Result<Transcoded, TranscodeError> {
    let original = std::fs::metadata(&image.path)?.len();
    let natural = backend.identify(&image.path).map_err(|e| match e {
        BackendError::Io(io) => TranscodeError::Io(io),
        other => TranscodeError::Decode(other.to_string()),
    })?;

    let params = plan_transcode(image, request, natural, explicit, config)?;
    let bytes = backend.transcode(&params)?;

    let artifact = bytes.len() as u64;
    if artifact >= original {
        return Err(TranscodeError::NoReduction { artifact, original });
    }

    Ok(Transcoded {
        bytes,
        width: params.width,
        height: params.height,
        natural,
    })
}
