//! Unsharp-mask sharpening.

use crate::config::SharpenConfig;
use image::RgbImage;
use imageproc::filter::gaussian_blur_f32;
use tracing::instrument;

/// Apply `out = img * (1 + amount) - blurred * amount` per channel.
///
/// A wide Gaussian (sigma ≈ 2) keeps the boost on real edges instead of the
/// single-pixel ringing a 3×3 Laplacian kernel produces.
#[instrument(skip_all, fields(width = img.width(), height = img.height()))]
pub fn sharpen(img: &RgbImage, config: &SharpenConfig) -> RgbImage {
    if config.amount <= 0.0 || img.width() == 0 || img.height() == 0 {
        return img.clone();
    }

    let blurred = gaussian_blur_f32(img, config.sigma);
    let gain = 1.0 + config.amount;
    let mut out = RgbImage::new(img.width(), img.height());
    for ((dst, src), blur) in out.pixels_mut().zip(img.pixels()).zip(blurred.pixels()) {
        for c in 0..3 {
            let v = src[c] as f32 * gain - blur[c] as f32 * config.amount;
            dst[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
