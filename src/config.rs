//! Enhancement configuration.
//!
//! Every numeric constant the pipeline uses lives here: blur sigmas, filter
//! strengths, window sizes, the denoise downscale threshold, detector
//! settings and encoder levels. The stock defaults reproduce the service's
//! fixed behaviour; an optional `config.toml` may override any subset.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [sharpen]
//! sigma = 2.0               # Gaussian blur sigma for the unsharp mask
//! amount = 0.7              # out = img*(1+amount) - blurred*amount
//!
//! [denoise]
//! max_dimension = 1600      # Downscale before denoising above this edge length
//! luminance_strength = 2.0  # Non-local means h for L
//! color_strength = 2.0      # Non-local means h for a/b
//! template_window = 5       # Patch size (odd)
//! search_window = 11        # Search area (odd)
//!
//! [color]
//! clip_limit = 2.0          # CLAHE contrast limit
//! tile_grid = 8             # CLAHE tiles per axis
//!
//! [upscale]
//! factor = 2                # Integer magnification
//!
//! [beautify]
//! cascade_model = "models/haarcascade_frontalface_default.xml"
//! scale_factor = 1.1
//! min_neighbors = 3
//! min_face_size = 80
//! diameter = 9              # Bilateral window diameter
//! sigma_color = 40.0
//! sigma_space = 40.0
//!
//! [output]
//! png_compression = 3       # 0 (fastest) - 9 (smallest)
//! default_jpeg_quality = 95
//!
//! [service]
//! storage_dir = "uploads"
//! max_workers = 4           # Omit for auto = CPU cores
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Complete enhancer configuration.
///
/// Constructed once at startup and shared by reference with every stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnhanceConfig {
    pub sharpen: SharpenConfig,
    pub denoise: DenoiseConfig,
    pub color: ColorConfig,
    pub upscale: UpscaleConfig,
    pub beautify: BeautifyConfig,
    pub output: OutputConfig,
    pub service: ServiceConfig,
}

impl EnhanceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Validation(msg.into()))
        }

        if !(self.sharpen.sigma > 0.0) {
            return invalid("sharpen.sigma must be positive");
        }
        if !(0.0..=5.0).contains(&self.sharpen.amount) {
            return invalid("sharpen.amount must be 0-5");
        }
        if self.denoise.max_dimension == 0 {
            return invalid("denoise.max_dimension must be non-zero");
        }
        if !(self.denoise.luminance_strength > 0.0) || !(self.denoise.color_strength > 0.0) {
            return invalid("denoise strengths must be positive");
        }
        if self.denoise.template_window % 2 == 0 || self.denoise.search_window % 2 == 0 {
            return invalid("denoise windows must be odd");
        }
        if self.denoise.search_window < self.denoise.template_window {
            return invalid("denoise.search_window must not be smaller than template_window");
        }
        if !(self.color.clip_limit >= 1.0) {
            return invalid("color.clip_limit must be at least 1.0");
        }
        if !(1..=64).contains(&self.color.tile_grid) {
            return invalid("color.tile_grid must be 1-64");
        }
        if !(1..=8).contains(&self.upscale.factor) {
            return invalid("upscale.factor must be 1-8");
        }
        if !(self.beautify.scale_factor > 1.0) {
            return invalid("beautify.scale_factor must be greater than 1.0");
        }
        if self.beautify.diameter == 0 {
            return invalid("beautify.diameter must be non-zero");
        }
        if !(self.beautify.sigma_color > 0.0) || !(self.beautify.sigma_space > 0.0) {
            return invalid("beautify sigmas must be positive");
        }
        if self.output.png_compression > 9 {
            return invalid("output.png_compression must be 0-9");
        }
        if !(1..=100).contains(&self.output.default_jpeg_quality) {
            return invalid("output.default_jpeg_quality must be 1-100");
        }
        if self.service.max_workers == Some(0) {
            return invalid("service.max_workers must be non-zero when set");
        }
        Ok(())
    }
}

/// Unsharp-mask settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SharpenConfig {
    /// Standard deviation of the Gaussian blur.
    pub sigma: f32,
    /// Weight of the detail layer added back (`α`).
    pub amount: f32,
}

impl Default for SharpenConfig {
    fn default() -> Self {
        Self {
            sigma: 2.0,
            amount: 0.7,
        }
    }
}

/// Adaptive non-local means settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DenoiseConfig {
    /// Longest edge denoised at full resolution. Larger inputs are processed
    /// on an area-downscaled proxy and resampled back.
    pub max_dimension: u32,
    /// Filter strength for the luminance channel.
    pub luminance_strength: f32,
    /// Filter strength for the two chroma channels.
    pub color_strength: f32,
    /// Side of the square patch compared between pixels.
    pub template_window: u32,
    /// Side of the square area searched for similar patches.
    pub search_window: u32,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1600,
            luminance_strength: 2.0,
            color_strength: 2.0,
            template_window: 5,
            search_window: 11,
        }
    }
}

/// Luminance CLAHE settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColorConfig {
    pub clip_limit: f32,
    pub tile_grid: u32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            tile_grid: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpscaleConfig {
    pub factor: u32,
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self { factor: 2 }
    }
}

/// Face detection and skin smoothing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BeautifyConfig {
    /// OpenCV Haar cascade (XML). A relative path that does not exist is also
    /// looked up in the usual OpenCV data directories. A missing file disables
    /// smoothing, not the pipeline.
    pub cascade_model: PathBuf,
    /// Pyramid step between detection scales.
    pub scale_factor: f32,
    /// Overlapping raw detections needed to accept a face.
    pub min_neighbors: u32,
    /// Smallest face edge, in source pixels.
    pub min_face_size: u32,
    /// Bilateral window diameter.
    pub diameter: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
}

impl Default for BeautifyConfig {
    fn default() -> Self {
        Self {
            cascade_model: PathBuf::from("models/haarcascade_frontalface_default.xml"),
            scale_factor: 1.1,
            min_neighbors: 3,
            min_face_size: 80,
            diameter: 9,
            sigma_color: 40.0,
            sigma_space: 40.0,
        }
    }
}

/// Encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// PNG compression level, applied regardless of request input.
    pub png_compression: u8,
    /// JPEG quality used when the request omits one or sends an invalid value.
    pub default_jpeg_quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            png_compression: 3,
            default_jpeg_quality: 95,
        }
    }
}

/// Request handling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Root directory for per-request inputs and artifacts.
    pub storage_dir: PathBuf,
    /// Maximum number of requests enhanced in parallel.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("uploads"),
            max_workers: None,
        }
    }
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_workers(config: &ServiceConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_workers.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(EnhanceConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// Tables merge key-by-key; any other overlay value replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<EnhanceConfig, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: EnhanceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a TOML file, or the stock defaults when `path` is `None`.
///
/// An explicitly named file that does not exist is an error; silently
/// falling back would hide a mistyped `--config` path.
pub fn load_config(path: Option<&Path>) -> Result<EnhanceConfig, ConfigError> {
    let overlay = match path {
        Some(p) => {
            let content = fs::read_to_string(p)?;
            Some(toml::from_str::<toml::Value>(&content)?)
        }
        None => None,
    };
    resolve_config(overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Photo Enhancer Configuration
# ============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Sharpen (unsharp mask)
# ---------------------------------------------------------------------------
[sharpen]
# Gaussian blur sigma used to build the mask.
sigma = 2.0

# Detail weight: out = img * (1 + amount) - blurred * amount.
amount = 0.7

# ---------------------------------------------------------------------------
# Denoise (non-local means)
# ---------------------------------------------------------------------------
[denoise]
# Inputs with an edge longer than this are denoised on a downscaled proxy
# and resampled back to their original size.
max_dimension = 1600

# Filter strength for luminance and for the two chroma channels.
luminance_strength = 2.0
color_strength = 2.0

# Patch and search window sizes in pixels (odd).
template_window = 5
search_window = 11

# ---------------------------------------------------------------------------
# Color correction (CLAHE on L*)
# ---------------------------------------------------------------------------
[color]
clip_limit = 2.0
tile_grid = 8

# ---------------------------------------------------------------------------
# Super-resolution
# ---------------------------------------------------------------------------
[upscale]
# Integer magnification applied with cubic interpolation.
factor = 2

# ---------------------------------------------------------------------------
# Beautify (face-region smoothing)
# ---------------------------------------------------------------------------
[beautify]
# OpenCV Haar cascade XML. A relative path that does not exist is also looked
# up under /usr/share/opencv4/haarcascades and similar. When no file is found,
# smoothing is skipped.
cascade_model = "models/haarcascade_frontalface_default.xml"
scale_factor = 1.1
min_neighbors = 3
min_face_size = 80

# Bilateral filter applied inside each detected face.
diameter = 9
sigma_color = 40.0
sigma_space = 40.0

# ---------------------------------------------------------------------------
# Output encoding
# ---------------------------------------------------------------------------
[output]
# PNG compression level (0-9). Requests cannot override it.
png_compression = 3

# JPEG quality used when a request omits jpegQuality or sends an invalid one.
default_jpeg_quality = 95

# ---------------------------------------------------------------------------
# Service
# ---------------------------------------------------------------------------
[service]
# Each request gets its own subdirectory here.
storage_dir = "uploads"

# Maximum parallel requests. Omit for auto (= number of CPU cores).
# max_workers = 4
"##
}
