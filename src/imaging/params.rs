//! Parameter types for encoding and stage execution.
//!
//! These types describe *what* to produce, not *how*. They are the interface
//! between request decoding ([`options`](crate::options)), the orchestrator,
//! and the [`codec`](super::codec) that does the byte-level work.
//!
//! ## Types
//!
//! - [`OutputFormat`]: PNG or JPEG, with the file name and content type of its artifact.
//! - [`Quality`]: JPEG quality (1–100, default 95). Out-of-range requests fall back to the default.
//! - [`PngCompression`]: PNG compression level (0–9, default 3). Clamped on construction.
//! - [`EncodeParams`]: Everything the encoder needs besides the pixels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Encoding of the persisted artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    /// Query-string / JSON spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    /// Artifact file name, also suggested to clients as the attachment name.
    pub fn artifact_name(self) -> String {
        format!("processed.{}", self.extension())
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an `outputFormat` value that is neither PNG nor JPEG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFormat(pub String);

impl fmt::Display for UnknownFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported output format '{}' (expected png or jpeg)", self.0)
    }
}

impl std::error::Error for UnknownFormat {}

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            _ => Err(UnknownFormat(s.to_string())),
        }
    }
}

/// JPEG quality setting (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u8);

impl Quality {
    pub const DEFAULT: Quality = Quality(95);

    /// Accept a requested quality, falling back to `default` when the
    /// request omitted it or sent something outside 1..=100.
    pub fn from_request(requested: Option<i64>, default: Quality) -> Self {
        match requested {
            Some(q) if (1..=100).contains(&q) => Self(q as u8),
            _ => default,
        }
    }

    /// Clamp an arbitrary value into 1..=100.
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// PNG compression level (0-9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngCompression(u8);

impl PngCompression {
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    pub fn level(self) -> u8 {
        self.0
    }
}

impl Default for PngCompression {
    fn default() -> Self {
        Self(3)
    }
}

/// Everything the encoder needs besides the pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    pub format: OutputFormat,
    pub jpeg_quality: Quality,
    pub png_compression: PngCompression,
}
