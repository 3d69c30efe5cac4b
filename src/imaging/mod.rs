//! Image transcoding.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions`, `avif-parse` for AVIF |
//! | **Resample** | Lanczos3 onto a transparent or opaque canvas |
//! | **Encode** | JPEG, PNG, WebP (`webp`), AVIF (rav1e) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension and cascade math
//! - **Parameters**: Data structures describing one encode
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: [`transcode`], combining calculations + backend with
//!   the "strictly smaller than the source" guard

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{cascade_value, png_compression_level, scale_dimensions};
pub use operations::{TranscodeError, Transcoded, plan_transcode, transcode};
pub use params::{Quality, TranscodeParams};
pub use rust_backend::RustBackend;
