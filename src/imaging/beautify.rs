//! Face-region smoothing.
//!
//! The input is reduced to grayscale for detection, and every face the
//! injected detector reports is replaced with an edge-preserving bilateral
//! filtered copy of itself. Pixels outside face regions are untouched. A
//! detector that reports itself unavailable makes the stage a no-op.

use super::calculations::{Dimensions, clamp_rect};
use super::face::{DetectionParams, DetectorError, FaceDetector, FaceRegion};
use crate::config::BeautifyConfig;
use image::{Rgb, RgbImage, imageops};
use tracing::{debug, instrument, warn};

/// Result of the beautify stage.
#[derive(Debug)]
pub struct BeautifyOutcome {
    pub image: RgbImage,
    pub faces: Vec<FaceRegion>,
    /// Why the stage did nothing, if it was skipped.
    pub skipped: Option<String>,
}

/// Smooth detected face regions.
///
/// Only [`DetectorError::Failed`] is an error; an unavailable detector yields
/// the input unchanged with `skipped` set.
#[instrument(skip_all, fields(width = img.width(), height = img.height()))]
pub fn beautify(
    img: &RgbImage,
    config: &BeautifyConfig,
    detector: &dyn FaceDetector,
) -> Result<BeautifyOutcome, DetectorError> {
    let gray = imageops::grayscale(img);
    let params = DetectionParams::from(config);

    let faces = match detector.detect(&gray, &params) {
        Ok(faces) => faces,
        Err(DetectorError::Unavailable(reason)) => {
            warn!(%reason, "face detector unavailable, skipping beautify");
            return Ok(BeautifyOutcome {
                image: img.clone(),
                faces: Vec::new(),
                skipped: Some(reason),
            });
        }
        Err(e) => return Err(e),
    };
    debug!(faces = faces.len(), "faces detected");

    let bounds = Dimensions::of(img);
    let mut out = img.clone();
    for face in &faces {
        let Some(r) = clamp_rect(
            face.x as i64,
            face.y as i64,
            face.width as i64,
            face.height as i64,
            bounds,
        ) else {
            continue;
        };
        let region = imageops::crop_imm(img, r.x, r.y, r.width, r.height).to_image();
        let smoothed = bilateral_filter(
            &region,
            config.diameter,
            config.sigma_color,
            config.sigma_space,
        );
        imageops::replace(&mut out, &smoothed, r.x as i64, r.y as i64);
    }

    Ok(BeautifyOutcome {
        image: out,
        faces,
        skipped: None,
    })
}

/// Edge-preserving bilateral filter over an RGB buffer.
///
/// Neighbours lie in a disc of the given `diameter`. Each one is weighted by
/// `exp(-r² / 2σs²)` for its spatial distance and `exp(-c² / 2σc²)` where `c`
/// is the sum of absolute channel differences to the centre pixel. Borders
/// replicate the edge pixel.
pub fn bilateral_filter(
    img: &RgbImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> RgbImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let radius = (diameter / 2).max(1) as i32;
    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let color_coeff = -0.5 / (sigma_color * sigma_color);

    let mut offsets = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f32;
            if r2.sqrt() <= radius as f32 {
                offsets.push((dx, dy, (r2 * space_coeff).exp()));
            }
        }
    }

    // Indexed by L1 colour distance 0..=765
    let color_weights: Vec<f32> = (0..=255 * 3)
        .map(|d| ((d * d) as f32 * color_coeff).exp())
        .collect();

    RgbImage::from_fn(w, h, |x, y| {
        let centre = img.get_pixel(x, y);
        let mut sum = [0.0f32; 3];
        let mut norm = 0.0f32;
        for &(dx, dy, ws) in &offsets {
            let nx = (x as i32 + dx).clamp(0, w as i32 - 1) as u32;
            let ny = (y as i32 + dy).clamp(0, h as i32 - 1) as u32;
            let p = img.get_pixel(nx, ny);
            let dist: usize = (0..3).map(|c| p[c].abs_diff(centre[c]) as usize).sum();
            let weight = ws * color_weights[dist];
            for c in 0..3 {
                sum[c] += weight * p[c] as f32;
            }
            norm += weight;
        }
        Rgb(sum.map(|s| (s / norm).round().clamp(0.0, 255.0) as u8))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::face::{NoFaceDetector, UnavailableDetector};
    use image::GrayImage;

    struct FixedDetector(Vec<FaceRegion>);

    impl FaceDetector for FixedDetector {
        fn detect(
            &self,
            _: &GrayImage,
            _: &DetectionParams,
        ) -> Result<Vec<FaceRegion>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenDetector;

    impl FaceDetector for BrokenDetector {
        fn detect(
            &self,
            _: &GrayImage,
            _: &DetectionParams,
        ) -> Result<Vec<FaceRegion>, DetectorError> {
            Err(DetectorError::Failed("boom".into()))
        }
    }

    fn checker(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = if (x + y) % 2 == 0 { 110 } else { 130 };
            Rgb([v, v, v])
        })
    }

    #[test]
    fn no_faces_leaves_image_identical() {
        let img = checker(50, 40);
        let out = beautify(&img, &BeautifyConfig::default(), &NoFaceDetector).unwrap();
        assert_eq!(out.image, img);
        assert!(out.faces.is_empty());
        assert!(out.skipped.is_none());
    }

    #[test]
    fn unavailable_detector_skips() {
        let img = checker(30, 30);
        let detector = UnavailableDetector::new("no model");
        let out = beautify(&img, &BeautifyConfig::default(), &detector).unwrap();
        assert_eq!(out.image, img);
        assert_eq!(out.skipped.as_deref(), Some("no model"));
    }

    #[test]
    fn detection_failure_is_an_error() {
        let img = checker(30, 30);
        assert!(beautify(&img, &BeautifyConfig::default(), &BrokenDetector).is_err());
    }

    #[test]
    fn only_face_region_is_smoothed() {
        let img = checker(60, 60);
        let face = FaceRegion {
            x: 10,
            y: 10,
            width: 20,
            height: 20,
        };
        let out = beautify(&img, &BeautifyConfig::default(), &FixedDetector(vec![face])).unwrap();
        assert_eq!(out.faces, vec![face]);
        assert_eq!(out.image.dimensions(), (60, 60));

        // Outside the region nothing changed
        assert_eq!(out.image.get_pixel(0, 0), img.get_pixel(0, 0));
        assert_eq!(out.image.get_pixel(45, 45), img.get_pixel(45, 45));
        // Inside, the checkerboard is pulled toward its mean
        let p = out.image.get_pixel(20, 20)[0] as i16;
        let orig = img.get_pixel(20, 20)[0] as i16;
        assert!((p - 120).abs() < (orig - 120).abs());
    }

    #[test]
    fn region_past_the_edge_is_clipped() {
        let img = checker(40, 40);
        let face = FaceRegion {
            x: 30,
            y: 30,
            width: 50,
            height: 50,
        };
        let out = beautify(&img, &BeautifyConfig::default(), &FixedDetector(vec![face])).unwrap();
        assert_eq!(out.image.dimensions(), (40, 40));
    }

    #[test]
    fn bilateral_preserves_strong_edges() {
        let img = RgbImage::from_fn(20, 20, |x, _| if x < 10 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) });
        let out = bilateral_filter(&img, 9, 40.0, 40.0);
        assert!(out.get_pixel(9, 10)[0] < 5);
        assert!(out.get_pixel(10, 10)[0] > 250);
    }

    #[test]
    fn bilateral_keeps_flat_color() {
        let img = RgbImage::from_pixel(12, 12, Rgb([40, 80, 160]));
        assert_eq!(bilateral_filter(&img, 9, 40.0, 40.0), img);
    }
}
