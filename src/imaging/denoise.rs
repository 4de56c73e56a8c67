//! Adaptive non-local means denoising.
//!
//! ## Resolution policy
//!
//! Non-local means costs `pixels × search²`, which is prohibitive on large
//! photos. Inputs with an edge longer than `max_dimension` are
//! area-downscaled to fit (see
//! [`denoise_working_size`](super::calculations::denoise_working_size)),
//! denoised, and resampled back with cubic interpolation. The returned buffer
//! always has the input's exact dimensions.
//!
//! ## Filter
//!
//! Runs in L*a*b* with L* stretched to 0..255 and a*/b* offset by 128, so the
//! strengths are in 8-bit units. For pixel `p` and candidate `q` in the search
//! window, L* is weighted by `exp(-d_L² / h_L²)` where `d_L²` is the mean
//! squared L* difference between the template patches around them. The a*/b*
//! pair is weighted the same way with its own patch distance (averaged over
//! the two channels) and `h_C`, so a luminance edge does not stop chroma noise
//! from being averaged away. Patch distances are accumulated one search offset at a
//! time with a summed-area table, so the template size does not affect cost.

use super::calculations::{Dimensions, denoise_working_size};
use super::color::LabPlanes;
use super::error::ImagingError;
use super::upscale::resize_cubic;
use crate::config::DenoiseConfig;
use fast_image_resize as fr;
use image::RgbImage;
use tracing::{debug, instrument};

/// Weights below `exp(-CUTOFF)` are treated as zero.
const CUTOFF: f32 = 20.0;

/// Lookup resolution for the weight table (entries per unit of `d²`).
const TABLE_RESOLUTION: f32 = 16.0;

/// Result of the denoise stage.
#[derive(Debug)]
pub struct Denoised {
    pub image: RgbImage,
    /// Size the filter actually ran at.
    pub working: Dimensions,
}

impl Denoised {
    pub fn downscaled(&self) -> bool {
        Dimensions::of(&self.image) != self.working
    }
}

/// Denoise `img`, working on a downscaled proxy when it is large.
#[instrument(skip_all, fields(width = img.width(), height = img.height()))]
pub fn denoise(img: &RgbImage, config: &DenoiseConfig) -> Result<Denoised, ImagingError> {
    let original = Dimensions::of(img);

    let Some(working) = denoise_working_size(original, config.max_dimension) else {
        return Ok(Denoised {
            image: nl_means(img, config),
            working: original,
        });
    };

    debug!(%original, %working, "denoising on downscaled proxy");
    let proxy = area_downscale(img, working)?;
    let filtered = nl_means(&proxy, config);
    let restored = resize_cubic(&filtered, original.width, original.height);
    Ok(Denoised {
        image: restored,
        working,
    })
}

/// Area-averaging downscale.
fn area_downscale(img: &RgbImage, size: Dimensions) -> Result<RgbImage, ImagingError> {
    let src = fr::images::Image::from_vec_u8(
        img.width(),
        img.height(),
        img.as_raw().clone(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| ImagingError::Resize(format!("source buffer: {e}")))?;
    let mut dst = fr::images::Image::new(size.width, size.height, fr::PixelType::U8x3);

    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Box));
    fr::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .map_err(|e| ImagingError::Resize(e.to_string()))?;

    RgbImage::from_raw(size.width, size.height, dst.into_vec())
        .ok_or_else(|| ImagingError::Resize("downscaled buffer has unexpected length".into()))
}

/// `exp(-d² / h²)` sampled on a fixed grid of `d²`.
struct WeightTable {
    values: Vec<f32>,
}

impl WeightTable {
    fn new(strength: f32) -> Self {
        let h_sq = strength * strength;
        let len = (CUTOFF * h_sq * TABLE_RESOLUTION).ceil() as usize + 1;
        let values = (0..len)
            .map(|i| (-(i as f32 / TABLE_RESOLUTION) / h_sq).exp())
            .collect();
        Self { values }
    }

    #[inline]
    fn weight(&self, dist: f32) -> f32 {
        let idx = (dist * TABLE_RESOLUTION) as usize;
        self.values.get(idx).copied().unwrap_or(0.0)
    }
}

fn nl_means(img: &RgbImage, config: &DenoiseConfig) -> RgbImage {
    let (w, h) = (img.width() as usize, img.height() as usize);
    if w == 0 || h == 0 {
        return img.clone();
    }

    let lab = LabPlanes::from_rgb(img);
    let planes: [Vec<f32>; 3] = [
        lab.l.iter().map(|l| l * 2.55).collect(),
        lab.a.iter().map(|a| a + 128.0).collect(),
        lab.b.iter().map(|b| b + 128.0).collect(),
    ];
    let [l, a, b] = filter_planes(&planes, w, h, config);

    let mut out = lab;
    for i in 0..w * h {
        out.l[i] = l[i] / 2.55;
        out.a[i] = a[i] - 128.0;
        out.b[i] = b[i] - 128.0;
    }
    out.to_rgb()
}

/// Non-local means over scaled L*a*b* planes.
///
/// L* is weighted by its own patch distance and `luminance_strength`; a* and
/// b* share a distance over the chroma pair and `color_strength`.
fn filter_planes(
    planes: &[Vec<f32>; 3],
    w: usize,
    h: usize,
    config: &DenoiseConfig,
) -> [Vec<f32>; 3] {
    let luma_table = WeightTable::new(config.luminance_strength);
    let chroma_table = WeightTable::new(config.color_strength);

    let t = (config.template_window / 2) as isize;
    let s = (config.search_window / 2) as isize;
    let n = w * h;
    let stride = w + 1;

    let mut num: [Vec<f32>; 3] = std::array::from_fn(|_| vec![0.0; n]);
    let mut luma_den = vec![0.0f32; n];
    let mut chroma_den = vec![0.0f32; n];
    let mut luma_diff = vec![0.0f32; n];
    let mut chroma_diff = vec![0.0f32; n];
    let mut luma_sat = vec![0.0f64; stride * (h + 1)];
    let mut chroma_sat = vec![0.0f64; stride * (h + 1)];

    let clamp_x = |x: isize| x.clamp(0, w as isize - 1) as usize;
    let clamp_y = |y: isize| y.clamp(0, h as isize - 1) as usize;
    let sq = |plane: &[f32], p: usize, q: usize| (plane[p] - plane[q]).powi(2);

    for dy in -s..=s {
        for dx in -s..=s {
            for y in 0..h {
                let qy = clamp_y(y as isize + dy);
                for x in 0..w {
                    let q = qy * w + clamp_x(x as isize + dx);
                    let p = y * w + x;
                    luma_diff[p] = sq(&planes[0][..], p, q);
                    chroma_diff[p] = (sq(&planes[1][..], p, q) + sq(&planes[2][..], p, q)) / 2.0;
                }
            }
            summed_area(&luma_diff, w, h, &mut luma_sat);
            summed_area(&chroma_diff, w, h, &mut chroma_sat);

            for y in 0..h {
                let y0 = clamp_y(y as isize - t);
                let y1 = clamp_y(y as isize + t) + 1;
                let qy = clamp_y(y as isize + dy);
                for x in 0..w {
                    let x0 = clamp_x(x as isize - t);
                    let x1 = clamp_x(x as isize + t) + 1;
                    let window = (x0, y0, x1, y1);

                    let p = y * w + x;
                    let q = qy * w + clamp_x(x as isize + dx);

                    let wl = luma_table.weight(window_mean(&luma_sat, stride, window));
                    if wl > 0.0 {
                        num[0][p] += wl * planes[0][q];
                        luma_den[p] += wl;
                    }
                    let wc = chroma_table.weight(window_mean(&chroma_sat, stride, window));
                    if wc > 0.0 {
                        num[1][p] += wc * planes[1][q];
                        num[2][p] += wc * planes[2][q];
                        chroma_den[p] += wc;
                    }
                }
            }
        }
    }

    // The zero offset always contributes weight 1, so both denominators are positive.
    let [mut l, mut a, mut b] = num;
    for i in 0..n {
        l[i] /= luma_den[i];
        a[i] /= chroma_den[i];
        b[i] /= chroma_den[i];
    }
    [l, a, b]
}

/// Mean of the half-open block `(x0, y0)..(x1, y1)` from a summed-area table.
fn window_mean(
    integral: &[f64],
    stride: usize,
    (x0, y0, x1, y1): (usize, usize, usize, usize),
) -> f32 {
    let area = ((x1 - x0) * (y1 - y0)) as f64;
    let sum = integral[y1 * stride + x1] - integral[y0 * stride + x1]
        - integral[y1 * stride + x0]
        + integral[y0 * stride + x0];
    (sum / area).max(0.0) as f32
}

/// Fill `integral` ((w+1)×(h+1), zero first row/column) with prefix sums of `values`.
fn summed_area(values: &[f32], w: usize, h: usize, integral: &mut [f64]) {
    let stride = w + 1;
    for y in 0..h {
        let mut row = 0.0f64;
        for x in 0..w {
            row += values[y * w + x] as f64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row;
        }
    }
}
