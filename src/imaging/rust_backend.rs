//! Production image backend on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, BMP, TIFF) | `image` crate decoders |
//! | Identify (AVIF artifacts) | `avif-parse` container metadata |
//! | Resample | `image::imageops::resize` with `Lanczos3` |
//! | Encode → JPEG | `JpegEncoder::new_with_quality` |
//! | Encode → PNG | `PngEncoder::new_with_quality`, level from quality |
//! | Encode → WebP | `webp` crate (lossy libwebp) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//!
//! Alpha-capable targets are composited onto a fully transparent canvas,
//! JPEG onto opaque black.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::params::TranscodeParams;
use crate::format::EncoderSupport;
use crate::types::TargetFormat;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use std::path::Path;

/// AVIF encoder speed: 1 (slowest) to 10. 6 keeps throughput reasonable.
const AVIF_SPEED: u8 = 6;

/// Backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn is_avif(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("avif"))
}

/// Load and decode an image from disk, sniffing the format from content.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| BackendError::Decode(format!("{}: {}", path.display(), e)))
}

/// Extract dimensions from an AVIF file's container metadata (no full decode needed).
fn identify_avif(path: &Path) -> Result<Dimensions, BackendError> {
    let file_data = std::fs::read(path)?;
    let avif = avif_parse::read_avif(&mut std::io::Cursor::new(&file_data))
        .map_err(|e| BackendError::Decode(format!("{}: {e:?}", path.display())))?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| BackendError::Decode(format!("{}: {e:?}", path.display())))?;
    Ok(Dimensions {
        width: meta.max_frame_width.get(),
        height: meta.max_frame_height.get(),
    })
}

/// Resample onto a canvas of exactly `width`×`height`.
fn compose(img: &DynamicImage, width: u32, height: u32, format: TargetFormat) -> RgbaImage {
    let resized = imageops::resize(&img.to_rgba8(), width, height, FilterType::Lanczos3);
    let background = if format.supports_alpha() {
        Rgba([0, 0, 0, 0])
    } else {
        Rgba([0, 0, 0, 255])
    };
    let mut canvas = RgbaImage::from_pixel(width, height, background);
    imageops::overlay(&mut canvas, &resized, 0, 0);
    canvas
}

fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

fn encode(canvas: RgbaImage, params: &TranscodeParams) -> Result<Vec<u8>, BackendError> {
    let quality = params.quality.value();
    let encode_err = |e: image::ImageError| BackendError::Encode(format!("{}: {e}", params.format));
    let mut buf = Vec::new();

    match params.format {
        TargetFormat::Jpg => {
            let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
            DynamicImage::ImageRgb8(rgb)
                .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality as u8))
                .map_err(encode_err)?;
        }
        TargetFormat::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut buf,
                png_compression(params.quality.png_level()),
                PngFilter::Adaptive,
            );
            DynamicImage::ImageRgba8(canvas)
                .write_with_encoder(encoder)
                .map_err(encode_err)?;
        }
        TargetFormat::Webp => {
            let (w, h) = canvas.dimensions();
            let mut config = webp::WebPConfig::new()
                .map_err(|_| BackendError::Encode("webp: cannot create encoder config".into()))?;
            config.quality = quality as f32;
            let mem = webp::Encoder::from_rgba(canvas.as_raw(), w, h)
                .encode_advanced(&config)
                .map_err(|e| BackendError::Encode(format!("webp: {e:?}")))?;
            buf.extend_from_slice(&mem);
        }
        TargetFormat::Avif => {
            let encoder = AvifEncoder::new_with_speed_quality(&mut buf, AVIF_SPEED, quality as u8);
            DynamicImage::ImageRgba8(canvas)
                .write_with_encoder(encoder)
                .map_err(encode_err)?;
        }
    }

    Ok(buf)
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        if is_avif(path) {
            return identify_avif(path);
        }
        let (width, height) = image::image_dimensions(path).map_err(|e| match e {
            image::ImageError::IoError(io) => BackendError::Io(io),
            other => BackendError::Decode(format!("{}: {}", path.display(), other)),
        })?;
        Ok(Dimensions { width, height })
    }

    fn transcode(&self, params: &TranscodeParams) -> Result<Vec<u8>, BackendError> {
        let img = load_image(&params.source)?;
        let canvas = compose(&img, params.width, params.height, params.format);
        encode(canvas, params)
    }

    fn encoders(&self) -> EncoderSupport {
        EncoderSupport {
            webp: true,
            avif: ImageFormat::Avif.writing_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::Quality;
    use crate::test_helpers::{write_jpeg, write_png_with_alpha};

    fn params(source: &Path, width: u32, height: u32, format: TargetFormat) -> TranscodeParams {
        TranscodeParams {
            source: source.to_path_buf(),
            width,
            height,
            format,
            quality: Quality::new(70),
        }
    }

    fn decode(bytes: &[u8]) -> DynamicImage {
        image::load_from_memory(bytes).unwrap()
    }

    #[test]
    fn identify_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        write_jpeg(&path, 200, 150);

        let dims = RustBackend::new().identify(&path).unwrap();
        assert_eq!((dims.width, dims.height), (200, 150));
    }

    #[test]
    fn identify_nonexistent_file_errors() {
        let result = RustBackend::new().identify(Path::new("/nonexistent/image.jpg"));
        assert!(result.is_err());
    }

    #[test]
    fn transcode_jpeg_to_smaller_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("source.jpg");
        write_jpeg(&path, 400, 300);

        let bytes = RustBackend::new()
            .transcode(&params(&path, 200, 150, TargetFormat::Jpg))
            .unwrap();
        let out = decode(&bytes);
        assert_eq!((out.width(), out.height()), (200, 150));
    }

    #[test]
    fn transcode_png_keeps_transparency() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("icon.png");
        write_png_with_alpha(&path, 64, 64);

        let bytes = RustBackend::new()
            .transcode(&params(&path, 32, 32, TargetFormat::Png))
            .unwrap();
        let out = decode(&bytes).to_rgba8();
        assert_eq!(out.dimensions(), (32, 32));
        assert_eq!(out.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn transcode_to_webp() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("source.jpg");
        write_jpeg(&path, 120, 80);

        let bytes = RustBackend::new()
            .transcode(&params(&path, 60, 40, TargetFormat::Webp))
            .unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }

    #[test]
    fn transcode_to_avif_and_identify() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("source.jpg");
        write_jpeg(&path, 120, 80);

        let backend = RustBackend::new();
        let bytes = backend
            .transcode(&params(&path, 60, 40, TargetFormat::Avif))
            .unwrap();
        let artifact = tmp.path().join("out.avif");
        std::fs::write(&artifact, &bytes).unwrap();

        let dims = backend.identify(&artifact).unwrap();
        assert_eq!((dims.width, dims.height), (60, 40));
    }

    #[test]
    fn transcode_garbage_is_decode_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let err = RustBackend::new()
            .transcode(&params(&path, 10, 10, TargetFormat::Jpg))
            .unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }

    #[test]
    fn encoders_report_webp_and_avif() {
        let support = RustBackend::new().encoders();
        assert!(support.webp);
        assert!(support.avif);
    }

    #[test]
    fn png_compression_mapping() {
        assert!(matches!(png_compression(0), CompressionType::Fast));
        assert!(matches!(png_compression(6), CompressionType::Default));
        assert!(matches!(png_compression(9), CompressionType::Best));
    }
}
