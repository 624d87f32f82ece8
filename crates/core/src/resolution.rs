//! Image size helpers: aspect-ratio references and area-preserving fits.
//!
//! Aspect ratios resolve to a reference size at the 512x512 pixel budget;
//! [`fit_to_pixel_count`] then rescales that reference to the pixel count of
//! the grid's base resolution.

use crate::error::{GridError, GridResult};

/* --------------------------------------------------------------------------
Named constants
-------------------------------------------------------------------------- */

/// Maximum dimension (width or height) allowed.
pub const MAX_DIMENSION: u32 = 16384;

/// Sizes are snapped to multiples of this many pixels.
pub const SIZE_PRECISION: u32 = 64;

/// Known aspect ratios and their reference size at a 512x512 budget.
const REFERENCE_SIZES: &[(&str, u32, u32)] = &[
    ("1:1", 512, 512),
    ("4:3", 576, 448),
    ("3:2", 608, 416),
    ("8:5", 608, 384),
    ("16:9", 672, 384),
    ("21:9", 768, 320),
    ("3:4", 448, 576),
    ("2:3", 416, 608),
    ("5:8", 384, 608),
    ("9:16", 384, 672),
    ("9:21", 320, 768),
];

/* --------------------------------------------------------------------------
Aspect ratios
-------------------------------------------------------------------------- */

/// Resolve an aspect-ratio string such as `"16:9"` to a reference size.
///
/// Known ratios use the fixed reference table; any other `W:H` pair is
/// computed at the same 512x512 budget. Returns `None` for values that do
/// not describe a ratio (e.g. `"Custom"`), which leaves the cell's explicit
/// width and height in charge.
pub fn aspect_ratio_reference(ratio: &str) -> Option<(u32, u32)> {
    let ratio = ratio.trim();
    if let Some((_, w, h)) = REFERENCE_SIZES.iter().find(|(name, _, _)| *name == ratio) {
        return Some((*w, *h));
    }
    let (w, h) = ratio.split_once(':')?;
    let w: f64 = w.trim().parse().ok()?;
    let h: f64 = h.trim().parse().ok()?;
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    let budget = 512.0 * 512.0;
    let width = (budget * w / h).sqrt();
    let height = width * h / w;
    Some((round_to_precision(width), round_to_precision(height)))
}

/// Rescale `width`x`height` so its area matches `target_pixels`, keeping
/// the aspect ratio and snapping both edges to [`SIZE_PRECISION`].
pub fn fit_to_pixel_count(width: u32, height: u32, target_pixels: u64) -> (u32, u32) {
    let area = width as f64 * height as f64;
    if area <= 0.0 || target_pixels == 0 {
        return (width, height);
    }
    let scale = (target_pixels as f64 / area).sqrt();
    (
        round_to_precision(width as f64 * scale),
        round_to_precision(height as f64 * scale),
    )
}

fn round_to_precision(value: f64) -> u32 {
    let snapped = (value / SIZE_PRECISION as f64).round() as u32 * SIZE_PRECISION;
    snapped.max(SIZE_PRECISION)
}

/* --------------------------------------------------------------------------
Validation
-------------------------------------------------------------------------- */

/// Validate that width and height are positive and within bounds.
pub fn validate_dimensions(width: i64, height: i64) -> GridResult<()> {
    if width <= 0 || height <= 0 {
        return Err(GridError::Configuration(format!(
            "Width and height must be greater than 0 (got {width}x{height})"
        )));
    }
    if width > MAX_DIMENSION as i64 || height > MAX_DIMENSION as i64 {
        return Err(GridError::Configuration(format!(
            "Dimensions must not exceed {MAX_DIMENSION}px (got {width}x{height})"
        )));
    }
    Ok(())
}

/// Validate one edge named `name`, returning it as a pixel count.
pub fn validate_dimension(name: &str, value: i64) -> GridResult<u32> {
    if value <= 0 || value > MAX_DIMENSION as i64 {
        return Err(GridError::Configuration(format!(
            "'{name}' must be between 1 and {MAX_DIMENSION}px (got {value})"
        )));
    }
    Ok(value as u32)
}

/* --------------------------------------------------------------------------
Tests
-------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    // -- aspect_ratio_reference --

    #[test]
    fn known_ratios_use_reference_table() {
        assert_eq!(aspect_ratio_reference("1:1"), Some((512, 512)));
        assert_eq!(aspect_ratio_reference(" 16:9 "), Some((672, 384)));
        assert_eq!(aspect_ratio_reference("9:16"), Some((384, 672)));
    }

    #[test]
    fn custom_ratio_is_not_a_reference() {
        assert_eq!(aspect_ratio_reference("Custom"), None);
        assert_eq!(aspect_ratio_reference("0:4"), None);
    }

    #[test]
    fn arbitrary_ratio_is_computed_at_reference_budget() {
        let (w, h) = aspect_ratio_reference("2:1").unwrap();
        assert_eq!((w, h), (704, 384));
        assert_eq!(w % SIZE_PRECISION, 0);
    }

    // -- fit_to_pixel_count --

    #[test]
    fn fit_preserves_area_for_square_target() {
        assert_eq!(fit_to_pixel_count(512, 512, 1024 * 1024), (1024, 1024));
    }

    #[test]
    fn fit_keeps_aspect_ratio() {
        let (w, h) = fit_to_pixel_count(672, 384, 1024 * 1024);
        assert_eq!((w, h), (1344, 768));
    }

    #[test]
    fn fit_with_zero_target_is_identity() {
        assert_eq!(fit_to_pixel_count(300, 200, 0), (300, 200));
    }

    // -- validate_dimensions --

    #[test]
    fn valid_dimensions_accepted() {
        assert!(validate_dimensions(1024, 768).is_ok());
    }

    #[test]
    fn non_positive_dimensions_rejected() {
        assert!(validate_dimensions(0, 512).is_err());
        assert!(validate_dimensions(512, -1).is_err());
    }

    #[test]
    fn oversized_dimension_rejected() {
        let msg = validate_dimensions(16385, 512).unwrap_err().to_string();
        assert!(msg.contains("must not exceed 16384"));
    }

    #[test]
    fn single_edge_bounds() {
        assert_eq!(validate_dimension("width", 768).unwrap(), 768);
        assert!(validate_dimension("width", 0).is_err());
        let msg = validate_dimension("height", 99_999_999).unwrap_err().to_string();
        assert!(msg.contains("'height'"));
    }
}
