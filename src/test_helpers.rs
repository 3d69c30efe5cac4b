//! Shared test utilities: synthetic images and throwaway site roots.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let site = TestSite::new();
//! site.jpeg("img/photo.jpg", 800, 600);
//! let config = site.config();
//! ```

use crate::config::EngineConfig;
use image::{ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =========================================================================
// Synthetic images
// =========================================================================

fn create_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
}

/// Gradient JPEG at maximum quality, so re-encoding at normal quality
/// reliably shrinks it.
pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    create_parent(path);
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
    });
    let file = fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    image::codecs::jpeg::JpegEncoder::new_with_quality(writer, 100)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// PNG with a transparent left half.
pub fn write_png_with_alpha(path: &Path, width: u32, height: u32) {
    create_parent(path);
    let img = RgbaImage::from_fn(width, height, |x, y| {
        let alpha = if x < width / 2 { 0 } else { 255 };
        Rgba([(x % 256) as u8, (y % 256) as u8, 90, alpha])
    });
    img.save(path).unwrap();
}

/// Tiny, already-optimal PNG: a single flat colour. Re-encoding cannot
/// make it smaller.
pub fn write_flat_png(path: &Path, width: u32, height: u32) {
    create_parent(path);
    let img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    img.save(path).unwrap();
}

// =========================================================================
// Site roots
// =========================================================================

/// A temporary document root with an `EngineConfig` pointing at it.
pub struct TestSite {
    pub tmp: TempDir,
}

impl TestSite {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn jpeg(&self, rel: &str, width: u32, height: u32) -> PathBuf {
        let path = self.path(rel);
        write_jpeg(&path, width, height);
        path
    }

    /// Arbitrary bytes under the root, for tests that never decode.
    pub fn file(&self, rel: &str, len: usize) -> PathBuf {
        let path = self.path(rel);
        create_parent(&path);
        fs::write(&path, vec![0x5A; len]).unwrap();
        path
    }

    /// Stock config rooted here, served from `https://example.com/`.
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.site.root_dir = self.root().to_path_buf();
        config.site.root_url = "https://example.com/".into();
        config
    }

    /// Names of files currently in the cache directory.
    pub fn cached_files(&self, config: &EngineConfig) -> Vec<String> {
        let Ok(entries) = fs::read_dir(config.cache_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
