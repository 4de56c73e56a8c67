//! Resolution upscaling.
//!
//! The [`Upscaler`] trait is the replacement point for a learned
//! super-resolution model: anything that accepts a buffer and returns one
//! scaled by exactly [`factor`](Upscaler::factor) can be injected into the
//! [`Enhancer`](crate::pipeline::Enhancer). The shipped implementation,
//! [`CubicUpscaler`], is plain Catmull-Rom interpolation with no model
//! dependency.

use super::error::ImagingError;
use image::RgbImage;
use image::imageops::{self, FilterType};

/// Integer-factor magnification of an RGB buffer.
pub trait Upscaler: Send + Sync {
    /// Magnification applied to both axes.
    fn factor(&self) -> u32;

    /// Return a buffer of exactly `factor × width` by `factor × height`.
    fn upscale(&self, img: &RgbImage) -> Result<RgbImage, ImagingError>;
}

/// Cubic-interpolation upscaler.
#[derive(Debug, Clone, Copy)]
pub struct CubicUpscaler {
    factor: u32,
}

impl CubicUpscaler {
    pub fn new(factor: u32) -> Self {
        Self {
            factor: factor.max(1),
        }
    }
}

impl Default for CubicUpscaler {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Upscaler for CubicUpscaler {
    fn factor(&self) -> u32 {
        self.factor
    }

    fn upscale(&self, img: &RgbImage) -> Result<RgbImage, ImagingError> {
        let (w, h) = img.dimensions();
        let target_w = w.checked_mul(self.factor);
        let target_h = h.checked_mul(self.factor);
        match (target_w, target_h) {
            (Some(tw), Some(th)) => Ok(resize_cubic(img, tw, th)),
            _ => Err(ImagingError::Resize(format!(
                "{w}x{h} cannot be scaled by {}",
                self.factor
            ))),
        }
    }
}

/// Resample to an exact size with Catmull-Rom (cubic) interpolation.
pub(crate) fn resize_cubic(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    imageops::resize(img, width, height, FilterType::CatmullRom)
}
