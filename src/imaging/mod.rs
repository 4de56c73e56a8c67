//! Image processing stages and codecs.
//!
//! | Stage | Crate / function |
//! |---|---|
//! | **Sharpen** | unsharp mask over `imageproc::filter::gaussian_blur_f32` |
//! | **Denoise** | non-local means; `fast_image_resize` box filter for the proxy |
//! | **Color** | `palette` L\*a\*b\* + CLAHE on L\* |
//! | **Upscale** | [`Upscaler`] trait, Catmull-Rom by default |
//! | **Beautify** | [`FaceDetector`] trait + bilateral filter on face regions |
//! | **Codec** | `image` JPEG / PNG encoders |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing encoder settings
//! - **Stages**: One file per enhancement stage, each a function from buffer to buffer
//! - **Seams**: [`Upscaler`] and [`FaceDetector`] traits for swappable models

pub mod beautify;
mod calculations;
pub mod cascade;
pub mod codec;
pub mod color;
pub mod denoise;
mod error;
pub mod face;
mod params;
pub mod sharpen;
pub mod upscale;

pub use beautify::{BeautifyOutcome, beautify, bilateral_filter};
pub use calculations::{Dimensions, Rect, denoise_working_size, scaled_dimensions};
pub use cascade::CascadeDetector;
pub use color::correct_color;
pub use denoise::{Denoised, denoise};
pub use error::ImagingError;
pub use face::{
    DetectionParams, DetectorError, FaceDetector, FaceRegion, LazyDetector, NoFaceDetector,
    UnavailableDetector, load_detector,
};
pub use params::{EncodeParams, OutputFormat, PngCompression, Quality, UnknownFormat};
pub use sharpen::sharpen;
pub use upscale::{CubicUpscaler, Upscaler};
