//! Pure calculation functions for stage geometry.
//!
//! All functions here are pure and testable without any I/O or images.

use serde::Serialize;

/// Width and height of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(img: &image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self { width, height }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Calculate the proxy size denoising runs at.
///
/// Returns `None` when both edges fit within `max_dimension` and the image is
/// denoised at full resolution. Otherwise both edges are scaled by the same
/// factor `min(max/width, max/height)`, floored, and kept at least 1px.
///
/// # Examples
/// ```
/// # use photo_enhancer::imaging::{denoise_working_size, Dimensions};
/// assert_eq!(denoise_working_size(Dimensions::new(1200, 900), 1600), None);
/// assert_eq!(
///     denoise_working_size(Dimensions::new(3200, 1800), 1600),
///     Some(Dimensions::new(1600, 900))
/// );
/// ```
pub fn denoise_working_size(original: Dimensions, max_dimension: u32) -> Option<Dimensions> {
    let Dimensions { width, height } = original;
    if width <= max_dimension && height <= max_dimension {
        return None;
    }

    // The longer edge limits the factor; integer math keeps it exactly at max.
    let max = max_dimension as u64;
    let (w, h) = if width >= height {
        (max, height as u64 * max / width as u64)
    } else {
        (width as u64 * max / height as u64, max)
    };
    Some(Dimensions::new((w as u32).max(1), (h as u32).max(1)))
}

/// Multiply both edges by an integer factor.
///
/// Returns `None` if the result would overflow `u32`.
pub fn scaled_dimensions(original: Dimensions, factor: u32) -> Option<Dimensions> {
    Some(Dimensions::new(
        original.width.checked_mul(factor)?,
        original.height.checked_mul(factor)?,
    ))
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Intersect a rectangle (possibly hanging off the edge) with the image bounds.
///
/// Returns `None` if nothing of it lies inside the image.
pub fn clamp_rect(x: i64, y: i64, width: i64, height: i64, bounds: Dimensions) -> Option<Rect> {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + width).min(bounds.width as i64);
    let y1 = (y + height).min(bounds.height as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Rect {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

/// Scale factors at which a `window`-sized detector is run over `image`.
///
/// Starts at 1.0 and multiplies by `step` until the scaled window no longer
/// fits. Scales whose window is smaller than `min_size` are skipped.
pub fn pyramid_scales(image: Dimensions, window: Dimensions, min_size: u32, step: f32) -> Vec<f32> {
    let mut scales = Vec::new();
    if step <= 1.0 || window.width == 0 || window.height == 0 {
        return scales;
    }

    let mut factor = 1.0f32;
    loop {
        let win_w = (window.width as f32 * factor).round() as u32;
        let win_h = (window.height as f32 * factor).round() as u32;
        if win_w > image.width || win_h > image.height {
            break;
        }
        if win_w >= min_size && win_h >= min_size {
            scales.push(factor);
        }
        factor *= step;
    }
    scales
}
