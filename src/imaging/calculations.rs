//! Pure calculation functions for artifact dimensions and encoder settings.
//!
//! All functions here are pure and testable without any I/O or images.

use super::backend::Dimensions;

/// Floor for cascaded quality and resize values.
pub const CASCADE_FLOOR: u32 = 10;

/// Dimensions the transcoder starts from: explicit node dimensions when both
/// are given, otherwise the natural image size.
pub fn working_dimensions(natural: Dimensions, explicit: Option<(u32, u32)>) -> (u32, u32) {
    explicit.unwrap_or((natural.width, natural.height))
}

/// Scale both edges by `percent`, truncating.
///
/// ```
/// # use light_images::imaging::scale_dimensions;
/// assert_eq!(scale_dimensions((1000, 750), 60), (600, 450));
/// assert_eq!(scale_dimensions((99, 51), 50), (49, 25));
/// ```
pub fn scale_dimensions((width, height): (u32, u32), percent: u32) -> (u32, u32) {
    let scale = |edge: u32| (u64::from(edge) * u64::from(percent) / 100) as u32;
    (scale(width), scale(height))
}

/// PNG compression level for a quality value: `min(9, 10 - quality / 10)`.
///
/// Quality 100 stores uncompressed, anything under 10 compresses hardest.
pub fn png_compression_level(quality: u32) -> u8 {
    let tenths = quality.min(100) / 10;
    (10 - tenths).min(9) as u8
}

/// Value for one step of a variant cascade: `max(10, start - step × i)`.
///
/// ```
/// # use light_images::imaging::cascade_value;
/// assert_eq!(cascade_value(90, 15, 2), 60);
/// assert_eq!(cascade_value(30, 15, 3), 10);
/// ```
pub fn cascade_value(start: u32, step: u32, iteration: u8) -> u32 {
    start
        .saturating_sub(step.saturating_mul(u32::from(iteration)))
        .max(CASCADE_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dimensions_override_natural() {
        let natural = Dimensions {
            width: 1200,
            height: 800,
        };
        assert_eq!(working_dimensions(natural, None), (1200, 800));
        assert_eq!(working_dimensions(natural, Some((300, 200))), (300, 200));
    }

    #[test]
    fn scale_truncates() {
        assert_eq!(scale_dimensions((1000, 750), 100), (1000, 750));
        assert_eq!(scale_dimensions((1000, 750), 60), (600, 450));
        assert_eq!(scale_dimensions((3, 3), 10), (0, 0));
    }

    #[test]
    fn scale_does_not_overflow() {
        assert_eq!(scale_dimensions((u32::MAX, 10), 100), (u32::MAX, 10));
    }

    #[test]
    fn png_levels_across_range() {
        let levels: Vec<u8> = [0, 9, 10, 45, 70, 89, 90, 99, 100, 120]
            .iter()
            .map(|q| png_compression_level(*q))
            .collect();
        assert_eq!(levels, [9, 9, 9, 6, 3, 2, 1, 1, 0, 0]);
    }

    #[test]
    fn cascade_descends_to_floor() {
        let qualities: Vec<u32> = (0..4).map(|i| cascade_value(90, 15, i)).collect();
        assert_eq!(qualities, [90, 75, 60, 45]);
        let resizes: Vec<u32> = (0..4).map(|i| cascade_value(100, 20, i)).collect();
        assert_eq!(resizes, [100, 80, 60, 40]);
        assert_eq!(cascade_value(20, 50, 1), 10);
        assert_eq!(cascade_value(5, 0, 0), 10);
    }
}
