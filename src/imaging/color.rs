//! Luminance-only color correction.
//!
//! The buffer is taken into CIE L*a*b* (D65), contrast-limited adaptive
//! histogram equalization (CLAHE) runs on L*, and a*/b* are carried through
//! untouched as floats before converting back. Equalizing RGB channels
//! independently would shift hue; equalizing L* alone cannot.
//!
//! The CLAHE here follows the usual tile formulation: the image is split into
//! a grid of tiles, each tile's histogram is clipped at
//! `max(1, clip_limit * area / 256)` with the excess spread evenly over all
//! bins, and each pixel's output is bilinearly interpolated from the lookup
//! tables of the four nearest tile centers.

use crate::config::ColorConfig;
use image::RgbImage;
use palette::white_point::D65;
use palette::{IntoColor, Lab, Srgb};
use tracing::{debug, instrument};

/// Planar L*a*b* copy of an RGB buffer.
///
/// `l` is in 0..=100, `a`/`b` roughly -128..=127.
#[derive(Debug, Clone)]
pub(crate) struct LabPlanes {
    pub width: u32,
    pub height: u32,
    pub l: Vec<f32>,
    pub a: Vec<f32>,
    pub b: Vec<f32>,
}

impl LabPlanes {
    pub fn from_rgb(img: &RgbImage) -> Self {
        let len = img.pixels().len();
        let mut l = Vec::with_capacity(len);
        let mut a = Vec::with_capacity(len);
        let mut b = Vec::with_capacity(len);
        for px in img.pixels() {
            let lab: Lab<D65, f32> = Srgb::new(px[0], px[1], px[2])
                .into_format::<f32>()
                .into_color();
            l.push(lab.l);
            a.push(lab.a);
            b.push(lab.b);
        }
        Self {
            width: img.width(),
            height: img.height(),
            l,
            a,
            b,
        }
    }

    pub fn to_rgb(&self) -> RgbImage {
        let mut out = RgbImage::new(self.width, self.height);
        for (i, px) in out.pixels_mut().enumerate() {
            let rgb: Srgb<f32> = Lab::<D65, f32>::new(self.l[i], self.a[i], self.b[i]).into_color();
            px.0 = [
                quantize(rgb.red),
                quantize(rgb.green),
                quantize(rgb.blue),
            ];
        }
        out
    }
}

/// Map a 0..1 component to 0..=255, clipping out-of-gamut values.
fn quantize(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Equalize luminance with CLAHE and convert back to RGB.
#[instrument(skip_all, fields(width = img.width(), height = img.height()))]
pub fn correct_color(img: &RgbImage, config: &ColorConfig) -> RgbImage {
    let mut lab = LabPlanes::from_rgb(img);

    let l8: Vec<u8> = lab
        .l
        .iter()
        .map(|&l| (l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    let equalized = clahe(&l8, lab.width, lab.height, config.clip_limit, config.tile_grid);
    for (l, v) in lab.l.iter_mut().zip(equalized) {
        *l = v as f32 * 100.0 / 255.0;
    }

    debug!(
        clip_limit = config.clip_limit,
        tile_grid = config.tile_grid,
        "luminance equalized"
    );
    lab.to_rgb()
}

/// Contrast-limited adaptive histogram equalization of one 8-bit plane.
///
/// The grid is reduced to the plane's size when the plane has fewer pixels
/// along an axis than requested tiles, so no tile is ever empty.
pub(crate) fn clahe(plane: &[u8], width: u32, height: u32, clip_limit: f32, grid: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return plane.to_vec();
    }

    let tiles_x = (grid as usize).clamp(1, w);
    let tiles_y = (grid as usize).clamp(1, h);
    let bounds_x = tile_bounds(w, tiles_x);
    let bounds_y = tile_bounds(h, tiles_y);

    let mut luts = Vec::with_capacity(tiles_x * tiles_y);
    for &(y0, y1) in &bounds_y {
        for &(x0, x1) in &bounds_x {
            let mut hist = [0u32; 256];
            for row in plane[y0 * w..y1 * w].chunks_exact(w) {
                for &v in &row[x0..x1] {
                    hist[v as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as u32;
            luts.push(tile_lut(hist, area, clip_limit));
        }
    }

    let weights_x = axis_weights(&bounds_x, w);
    let weights_y = axis_weights(&bounds_y, h);

    let mut out = vec![0u8; plane.len()];
    for y in 0..h {
        let (ty1, ty2, wy) = weights_y[y];
        for x in 0..w {
            let (tx1, tx2, wx) = weights_x[x];
            let v = plane[y * w + x] as usize;
            let top = (1.0 - wx) * luts[ty1 * tiles_x + tx1][v] as f32
                + wx * luts[ty1 * tiles_x + tx2][v] as f32;
            let bottom = (1.0 - wx) * luts[ty2 * tiles_x + tx1][v] as f32
                + wx * luts[ty2 * tiles_x + tx2][v] as f32;
            out[y * w + x] = ((1.0 - wy) * top + wy * bottom).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Split `len` pixels into `tiles` contiguous, non-empty `[start, end)` ranges.
fn tile_bounds(len: usize, tiles: usize) -> Vec<(usize, usize)> {
    (0..tiles)
        .map(|t| (t * len / tiles, (t + 1) * len / tiles))
        .collect()
}

/// For each pixel along an axis: the two neighbouring tiles and the weight of the second.
fn axis_weights(bounds: &[(usize, usize)], len: usize) -> Vec<(usize, usize, f32)> {
    let centers: Vec<f32> = bounds
        .iter()
        .map(|&(s, e)| (s + e) as f32 / 2.0 - 0.5)
        .collect();
    let last = centers.len() - 1;

    (0..len)
        .map(|i| {
            let pos = i as f32;
            if pos <= centers[0] {
                return (0, 0, 0.0);
            }
            if pos >= centers[last] {
                return (last, last, 0.0);
            }
            let t = centers
                .windows(2)
                .position(|c| pos >= c[0] && pos < c[1])
                .unwrap_or(last - 1);
            let wgt = (pos - centers[t]) / (centers[t + 1] - centers[t]);
            (t, t + 1, wgt)
        })
        .collect()
}

/// Clip a tile histogram and turn it into an equalization lookup table.
fn tile_lut(mut hist: [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    if clip_limit > 0.0 {
        let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut clipped = 0u32;
        for bin in hist.iter_mut() {
            if *bin > clip {
                clipped += *bin - clip;
                *bin = clip;
            }
        }

        let batch = clipped / 256;
        let mut residual = clipped - batch * 256;
        for bin in hist.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (256 / residual as usize).max(1);
            let mut i = 0;
            while i < 256 && residual > 0 {
                hist[i] += 1;
                residual -= 1;
                i += step;
            }
        }
    }

    let scale = 255.0 / area.max(1) as f32;
    let mut lut = [0u8; 256];
    let mut sum = 0u32;
    for (i, count) in hist.iter().enumerate() {
        sum += count;
        lut[i] = (sum as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn lab_of(px: &Rgb<u8>) -> Lab<D65, f32> {
        Srgb::new(px[0], px[1], px[2]).into_format::<f32>().into_color()
    }

    #[test]
    fn lab_roundtrip_is_near_lossless() {
        let img = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 77]));
        let back = LabPlanes::from_rgb(&img).to_rgb();
        for (a, b) in img.pixels().zip(back.pixels()) {
            for c in 0..3 {
                assert!((a[c] as i16 - b[c] as i16).abs() <= 1);
            }
        }
    }

    #[test]
    fn solid_color_keeps_chroma() {
        let img = RgbImage::from_pixel(40, 30, Rgb([150, 90, 60]));
        let out = correct_color(&img, &ColorConfig::default());
        let before = lab_of(img.get_pixel(0, 0));
        for px in out.pixels() {
            let after = lab_of(px);
            assert!((after.a - before.a).abs() < 2.0, "a* drifted: {} vs {}", after.a, before.a);
            assert!((after.b - before.b).abs() < 2.0, "b* drifted: {} vs {}", after.b, before.b);
        }
    }

    #[test]
    fn correct_color_preserves_dimensions() {
        let img = RgbImage::from_fn(37, 5, |x, _| Rgb([x as u8 * 6, 40, 200]));
        let out = correct_color(&img, &ColorConfig::default());
        assert_eq!(out.dimensions(), (37, 5));
    }

    #[test]
    fn clahe_stretches_low_contrast_plane() {
        let plane: Vec<u8> = (0..64 * 64u32)
            .map(|i| 100 + ((i % 64 + (i / 64) * 3) % 8) as u8)
            .collect();
        let out = clahe(&plane, 64, 64, 2.0, 8);
        let min_in = *plane.iter().min().unwrap();
        let max_in = *plane.iter().max().unwrap();
        let min_out = *out.iter().min().unwrap();
        let max_out = *out.iter().max().unwrap();
        assert!(max_out - min_out > max_in - min_in);
    }

    #[test]
    fn clahe_is_monotonic_within_a_tile_grid_of_one() {
        let plane: Vec<u8> = (0..=255u8).collect();
        let out = clahe(&plane, 16, 16, 2.0, 1);
        for pair in out.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn clahe_handles_planes_smaller_than_grid() {
        let plane = vec![10u8, 200, 30, 40, 50, 60];
        let out = clahe(&plane, 3, 2, 2.0, 8);
        assert_eq!(out.len(), plane.len());
    }

    #[test]
    fn tile_lut_unclipped_uniform_histogram_is_identity() {
        let hist = [1u32; 256];
        let lut = tile_lut(hist, 256, 0.0);
        assert_eq!(lut[0], 1);
        assert_eq!(lut[255], 255);
        assert_eq!(lut[127], 128);
    }

    #[test]
    fn tile_bounds_cover_axis_without_gaps() {
        let bounds = tile_bounds(10, 8);
        assert_eq!(bounds.first().unwrap().0, 0);
        assert_eq!(bounds.last().unwrap().1, 10);
        for pair in bounds.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert!(bounds.iter().all(|(s, e)| e > s));
    }
}
