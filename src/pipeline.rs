//! Enhancement pipeline orchestrator.
//!
//! Decodes one input file, runs the enabled stages over the buffer, and
//! writes the encoded artifact. Stages always run in this order:
//!
//! ```text
//! sharpen → denoise → color correction → super-resolution → beautify
//! ```
//!
//! Denoise runs before upscaling so it works on the smaller buffer, color
//! correction sees denoised data, and face detection and smoothing happen at
//! final resolution. The order is not configurable.
//!
//! Each stage's output size is checked against what the stage promises
//! (super-resolution multiplies by its factor, everything else preserves
//! size). A mismatch aborts the run with [`EnhanceError::StageFailed`]
//! instead of passing a malformed buffer downstream.

use crate::config::EnhanceConfig;
use crate::imaging::{
    self, CubicUpscaler, Dimensions, EncodeParams, FaceDetector, ImagingError, LazyDetector,
    OutputFormat, PngCompression, Upscaler, codec, scaled_dimensions,
};
use crate::options::EnhancementOptions;
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// One transform in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Sharpen,
    Denoise,
    ColorCorrection,
    SuperResolution,
    Beautify,
}

impl Stage {
    /// Execution order.
    pub const ORDER: [Stage; 5] = [
        Stage::Sharpen,
        Stage::Denoise,
        Stage::ColorCorrection,
        Stage::SuperResolution,
        Stage::Beautify,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Sharpen => "sharpen",
            Stage::Denoise => "denoise",
            Stage::ColorCorrection => "color correction",
            Stage::SuperResolution => "super-resolution",
            Stage::Beautify => "beautify",
        }
    }

    fn enabled(self, options: &EnhancementOptions) -> bool {
        match self {
            Stage::Sharpen => options.sharpen,
            Stage::Denoise => options.denoise,
            Stage::ColorCorrection => options.color_correction,
            Stage::SuperResolution => options.super_resolution,
            Stage::Beautify => options.beautify,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum EnhanceError {
    #[error("Failed to decode input image: {0}")]
    Decode(String),
    #[error("{stage} stage failed: {message}")]
    StageFailed { stage: Stage, message: String },
    #[error("Failed to encode output image: {0}")]
    Encode(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse failure category, for callers that map errors to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Decode,
    Stage,
    Encode,
    Io,
}

impl EnhanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnhanceError::Decode(_) => ErrorKind::Decode,
            EnhanceError::StageFailed { .. } => ErrorKind::Stage,
            EnhanceError::Encode(_) => ErrorKind::Encode,
            EnhanceError::Io(_) => ErrorKind::Io,
        }
    }

    fn stage(stage: Stage, err: impl fmt::Display) -> Self {
        EnhanceError::StageFailed {
            stage,
            message: err.to_string(),
        }
    }
}

/// Stage-specific facts worth reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageDetail {
    None,
    Denoise {
        working: Dimensions,
        downscaled: bool,
    },
    Upscale {
        factor: u32,
    },
    Beautify {
        faces: usize,
        skipped: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub input: Dimensions,
    pub output: Dimensions,
    pub detail: StageDetail,
    pub elapsed_ms: u64,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct EnhanceReport {
    pub input: Dimensions,
    pub output: Dimensions,
    pub format: OutputFormat,
    pub output_path: PathBuf,
    pub stages: Vec<StageReport>,
    pub elapsed_ms: u64,
}

/// Stage configuration plus the injected models.
#[derive(Clone)]
pub struct Enhancer {
    config: EnhanceConfig,
    detector: Arc<dyn FaceDetector>,
    upscaler: Arc<dyn Upscaler>,
}

impl fmt::Debug for Enhancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enhancer")
            .field("config", &self.config)
            .field("upscale_factor", &self.upscaler.factor())
            .finish_non_exhaustive()
    }
}

impl Enhancer {
    /// Build with the configured cascade and a cubic upscaler.
    ///
    /// The cascade is read on the first beautify request.
    pub fn new(config: EnhanceConfig) -> Self {
        let detector = Arc::new(LazyDetector::new(&config.beautify.cascade_model));
        let upscaler = Arc::new(CubicUpscaler::new(config.upscale.factor));
        Self::with_components(config, detector, upscaler)
    }

    pub fn with_components(
        config: EnhanceConfig,
        detector: Arc<dyn FaceDetector>,
        upscaler: Arc<dyn Upscaler>,
    ) -> Self {
        Self {
            config,
            detector,
            upscaler,
        }
    }

    pub fn config(&self) -> &EnhanceConfig {
        &self.config
    }

    pub fn encode_params(&self, options: &EnhancementOptions) -> EncodeParams {
        EncodeParams {
            format: options.output_format,
            jpeg_quality: options.jpeg_quality,
            png_compression: PngCompression::new(self.config.output.png_compression),
        }
    }

    /// Run every enabled stage over `img` in order.
    pub fn run_stages(
        &self,
        mut img: RgbImage,
        options: &EnhancementOptions,
    ) -> Result<(RgbImage, Vec<StageReport>), EnhanceError> {
        let mut reports = Vec::new();
        for stage in Stage::ORDER {
            if !stage.enabled(options) {
                continue;
            }
            let input = Dimensions::of(&img);
            let started = Instant::now();
            let (next, detail) = self.apply(stage, &img)?;
            let output = Dimensions::of(&next);

            let expected = self.expected_output(stage, input)?;
            if output != expected {
                return Err(EnhanceError::stage(
                    stage,
                    format!("produced {output}, expected {expected}"),
                ));
            }

            let elapsed_ms = started.elapsed().as_millis() as u64;
            debug!(%stage, %input, %output, elapsed_ms, "stage complete");
            reports.push(StageReport {
                stage,
                input,
                output,
                detail,
                elapsed_ms,
            });
            img = next;
        }
        Ok((img, reports))
    }

    fn expected_output(&self, stage: Stage, input: Dimensions) -> Result<Dimensions, EnhanceError> {
        match stage {
            Stage::SuperResolution => scaled_dimensions(input, self.upscaler.factor())
                .ok_or_else(|| EnhanceError::stage(stage, format!("{input} is too large to upscale"))),
            _ => Ok(input),
        }
    }

    fn apply(&self, stage: Stage, img: &RgbImage) -> Result<(RgbImage, StageDetail), EnhanceError> {
        let c = &self.config;
        match stage {
            Stage::Sharpen => Ok((imaging::sharpen(img, &c.sharpen), StageDetail::None)),
            Stage::Denoise => {
                let d = imaging::denoise(img, &c.denoise).map_err(|e| EnhanceError::stage(stage, e))?;
                let detail = StageDetail::Denoise {
                    working: d.working,
                    downscaled: d.downscaled(),
                };
                Ok((d.image, detail))
            }
            Stage::ColorCorrection => Ok((imaging::correct_color(img, &c.color), StageDetail::None)),
            Stage::SuperResolution => {
                let out = self
                    .upscaler
                    .upscale(img)
                    .map_err(|e| EnhanceError::stage(stage, e))?;
                Ok((
                    out,
                    StageDetail::Upscale {
                        factor: self.upscaler.factor(),
                    },
                ))
            }
            Stage::Beautify => {
                let outcome = imaging::beautify(img, &c.beautify, self.detector.as_ref())
                    .map_err(|e| EnhanceError::stage(stage, e))?;
                let detail = StageDetail::Beautify {
                    faces: outcome.faces.len(),
                    skipped: outcome.skipped,
                };
                Ok((outcome.image, detail))
            }
        }
    }
}

/// Decode `input`, run the enabled stages, and write the artifact to `output`.
///
/// Nothing is written when decoding or any stage fails.
#[instrument(skip(options, enhancer), fields(format = %options.output_format))]
pub fn enhance(
    input: &Path,
    output: &Path,
    options: &EnhancementOptions,
    enhancer: &Enhancer,
) -> Result<EnhanceReport, EnhanceError> {
    let started = Instant::now();
    let img = codec::decode(input).map_err(|e| match e {
        ImagingError::Io(io) => EnhanceError::Io(io),
        other => EnhanceError::Decode(other.to_string()),
    })?;
    let input_dims = Dimensions::of(&img);

    let (img, stages) = enhancer.run_stages(img, options)?;
    let output_dims = Dimensions::of(&img);

    let params = enhancer.encode_params(options);
    codec::encode_to_path(&img, &params, output).map_err(|e| EnhanceError::Encode(e.to_string()))?;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        input = %input_dims,
        output = %output_dims,
        stages = stages.len(),
        elapsed_ms,
        "enhancement complete"
    );
    Ok(EnhanceReport {
        input: input_dims,
        output: output_dims,
        format: options.output_format,
        output_path: output.to_path_buf(),
        stages,
        elapsed_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::upscale::tests::RecordingUpscaler;
    use crate::imaging::{NoFaceDetector, Quality};
    use image::Rgb;

    fn enhancer() -> Enhancer {
        Enhancer::with_components(
            EnhanceConfig::default(),
            Arc::new(NoFaceDetector),
            Arc::new(CubicUpscaler::default()),
        )
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 90])
        })
    }

    fn write_png(dir: &Path, img: &RgbImage) -> PathBuf {
        let path = dir.join("input.png");
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn stage_order_is_fixed() {
        let names: Vec<_> = Stage::ORDER.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            ["sharpen", "denoise", "color correction", "super-resolution", "beautify"]
        );
    }

    #[test]
    fn all_flags_off_reencodes_identically() {
        let tmp = tempfile::TempDir::new().unwrap();
        let img = gradient(40, 30);
        let input = write_png(tmp.path(), &img);
        let output = tmp.path().join("processed.png");

        let report = enhance(&input, &output, &EnhancementOptions::default(), &enhancer()).unwrap();
        assert!(report.stages.is_empty());
        assert_eq!(codec::decode(&output).unwrap(), img);
    }

    #[test]
    fn super_resolution_doubles() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = write_png(tmp.path(), &gradient(100, 100));
        let output = tmp.path().join("processed.png");
        let options = EnhancementOptions {
            super_resolution: true,
            ..Default::default()
        };

        let report = enhance(&input, &output, &options, &enhancer()).unwrap();
        assert_eq!(report.output, Dimensions::new(200, 200));
        assert_eq!(codec::decode(&output).unwrap().dimensions(), (200, 200));
    }

    #[test]
    fn denoise_runs_before_upscale() {
        let recorder = Arc::new(RecordingUpscaler::default());
        let enhancer = Enhancer::with_components(
            EnhanceConfig::default(),
            Arc::new(NoFaceDetector),
            recorder.clone(),
        );
        let options = EnhancementOptions {
            denoise: true,
            super_resolution: true,
            ..Default::default()
        };

        let (out, reports) = enhancer.run_stages(gradient(24, 16), &options).unwrap();
        assert_eq!(out.dimensions(), (48, 32));
        let stages: Vec<_> = reports.iter().map(|r| r.stage).collect();
        assert_eq!(stages, [Stage::Denoise, Stage::SuperResolution]);

        // Denoise saw the pre-upscale buffer
        assert_eq!(
            reports[0].detail,
            StageDetail::Denoise {
                working: Dimensions::new(24, 16),
                downscaled: false
            }
        );
        assert_eq!(reports[0].input, reports[0].output);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![(24, 16)]);
    }

    #[test]
    fn every_stage_runs_in_order() {
        let options = EnhancementOptions {
            sharpen: true,
            denoise: true,
            color_correction: true,
            super_resolution: true,
            beautify: true,
            output_format: OutputFormat::Jpeg,
            jpeg_quality: Quality::DEFAULT,
        };
        let (out, reports) = enhancer().run_stages(gradient(20, 12), &options).unwrap();
        assert_eq!(out.dimensions(), (40, 24));
        let stages: Vec<_> = reports.iter().map(|r| r.stage).collect();
        assert_eq!(stages, Stage::ORDER);
        assert_eq!(reports[4].input, Dimensions::new(40, 24));
    }

    #[test]
    fn beautify_without_faces_keeps_size() {
        let options = EnhancementOptions {
            beautify: true,
            ..Default::default()
        };
        let img = gradient(64, 48);
        let (out, reports) = enhancer().run_stages(img.clone(), &options).unwrap();
        assert_eq!(out, img);
        assert_eq!(
            reports[0].detail,
            StageDetail::Beautify {
                faces: 0,
                skipped: None
            }
        );
    }

    #[test]
    fn unavailable_detector_is_recorded_not_fatal() {
        let enhancer = Enhancer::with_components(
            EnhanceConfig::default(),
            Arc::new(imaging::UnavailableDetector::new("model missing")),
            Arc::new(CubicUpscaler::default()),
        );
        let options = EnhancementOptions {
            beautify: true,
            ..Default::default()
        };
        let (_, reports) = enhancer.run_stages(gradient(10, 10), &options).unwrap();
        assert_eq!(
            reports[0].detail,
            StageDetail::Beautify {
                faces: 0,
                skipped: Some("model missing".into())
            }
        );
    }

    struct ShrinkingUpscaler;

    impl Upscaler for ShrinkingUpscaler {
        fn factor(&self) -> u32 {
            2
        }

        fn upscale(&self, img: &RgbImage) -> Result<RgbImage, ImagingError> {
            Ok(img.clone())
        }
    }

    #[test]
    fn wrong_upscaler_size_is_stage_failure() {
        let enhancer = Enhancer::with_components(
            EnhanceConfig::default(),
            Arc::new(NoFaceDetector),
            Arc::new(ShrinkingUpscaler),
        );
        let options = EnhancementOptions {
            super_resolution: true,
            ..Default::default()
        };
        let err = enhancer.run_stages(gradient(8, 8), &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Stage);
        assert!(err.to_string().contains("super-resolution"));
    }

    #[test]
    fn undecodable_input_writes_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("input.png");
        std::fs::write(&input, b"not an image").unwrap();
        let output = tmp.path().join("processed.png");

        let err = enhance(&input, &output, &EnhancementOptions::default(), &enhancer()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(!output.exists());
    }

    #[test]
    fn missing_input_is_io() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = enhance(
            &tmp.path().join("absent.png"),
            &tmp.path().join("processed.png"),
            &EnhancementOptions::default(),
            &enhancer(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn unwritable_output_is_encode_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = write_png(tmp.path(), &gradient(8, 8));
        let output = tmp.path().join("no-such-dir").join("processed.png");
        let err = enhance(&input, &output, &EnhancementOptions::default(), &enhancer()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encode);
    }

    #[test]
    fn png_compression_comes_from_config() {
        let mut config = EnhanceConfig::default();
        config.output.png_compression = 7;
        let enhancer = Enhancer::with_components(
            config,
            Arc::new(NoFaceDetector),
            Arc::new(CubicUpscaler::default()),
        );
        let params = enhancer.encode_params(&EnhancementOptions::default());
        assert_eq!(params.png_compression.level(), 7);
        assert_eq!(params.format, OutputFormat::Png);
    }
}
