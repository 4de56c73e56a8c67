//! Enhancement options sent alongside an upload.
//!
//! The wire form is a JSON object with camelCase keys:
//!
//! ```json
//! { "sharpen": true, "denoise": false, "colorCorrection": true,
//!   "superResolution": false, "beautify": false,
//!   "outputFormat": "jpeg", "jpegQuality": 80 }
//! ```
//!
//! Toggles default to `false`. `superResolution` also accepts the older key
//! `upscale`. `outputFormat` defaults to PNG and accepts `jpg` for JPEG; any
//! other value is rejected. `jpegQuality` is lenient: a missing, non-numeric,
//! non-positive or out-of-range value means the configured default.
//! Unrecognised keys are ignored.

use crate::imaging::{OutputFormat, Quality};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("options must be a JSON object: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Format(#[from] crate::imaging::UnknownFormat),
}

/// Which stages to run and how to encode the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnhancementOptions {
    pub sharpen: bool,
    pub denoise: bool,
    pub color_correction: bool,
    pub super_resolution: bool,
    pub beautify: bool,
    pub output_format: OutputFormat,
    pub jpeg_quality: Quality,
}

impl EnhancementOptions {
    /// True when no stage is enabled and the run is a plain re-encode.
    pub fn is_passthrough(&self) -> bool {
        !(self.sharpen
            || self.denoise
            || self.color_correction
            || self.super_resolution
            || self.beautify)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WireOptions {
    sharpen: bool,
    denoise: bool,
    color_correction: bool,
    #[serde(alias = "upscale")]
    super_resolution: bool,
    beautify: bool,
    output_format: Option<String>,
    jpeg_quality: Option<Value>,
}

/// Numeric value of a JSON quality field, if it is a whole number.
fn quality_number(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i64)
    })
}

/// Decode the options JSON, using `default_quality` when `jpegQuality` is unusable.
pub fn parse_options(
    json: &str,
    default_quality: Quality,
) -> Result<EnhancementOptions, OptionsError> {
    let wire: WireOptions = serde_json::from_str(json)?;

    let output_format = match wire.output_format.as_deref() {
        None => OutputFormat::default(),
        Some(s) => s.parse()?,
    };
    let requested = wire.jpeg_quality.as_ref().and_then(quality_number);

    Ok(EnhancementOptions {
        sharpen: wire.sharpen,
        denoise: wire.denoise,
        color_correction: wire.color_correction,
        super_resolution: wire.super_resolution,
        beautify: wire.beautify,
        output_format,
        jpeg_quality: Quality::from_request(requested, default_quality),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> EnhancementOptions {
        parse_options(json, Quality::DEFAULT).unwrap()
    }

    #[test]
    fn empty_object_is_passthrough_png() {
        let opts = parse("{}");
        assert!(opts.is_passthrough());
        assert_eq!(opts.output_format, OutputFormat::Png);
        assert_eq!(opts.jpeg_quality.value(), 95);
    }

    #[test]
    fn reads_camel_case_toggles() {
        let opts = parse(
            r#"{"sharpen":true,"denoise":true,"colorCorrection":true,
                "superResolution":true,"beautify":true}"#,
        );
        assert!(opts.sharpen && opts.denoise && opts.color_correction);
        assert!(opts.super_resolution && opts.beautify);
    }

    #[test]
    fn upscale_is_an_alias() {
        assert!(parse(r#"{"upscale":true}"#).super_resolution);
    }

    #[test]
    fn jpeg_quality_falls_back_to_default() {
        for q in ["0", "-5", "101", "\"high\"", "null", "42.5"] {
            let opts = parse(&format!(r#"{{"outputFormat":"jpeg","jpegQuality":{q}}}"#));
            assert_eq!(opts.jpeg_quality.value(), 95, "jpegQuality {q}");
        }
        assert_eq!(parse(r#"{"outputFormat":"jpeg"}"#).jpeg_quality.value(), 95);
    }

    #[test]
    fn jpeg_quality_in_range_is_kept() {
        assert_eq!(parse(r#"{"jpegQuality":42}"#).jpeg_quality.value(), 42);
        assert_eq!(parse(r#"{"jpegQuality":80.0}"#).jpeg_quality.value(), 80);
    }

    #[test]
    fn configured_default_quality_is_used() {
        let opts = parse_options(r#"{"jpegQuality":0}"#, Quality::new(70)).unwrap();
        assert_eq!(opts.jpeg_quality.value(), 70);
    }

    #[test]
    fn format_aliases() {
        assert_eq!(parse(r#"{"outputFormat":"jpg"}"#).output_format, OutputFormat::Jpeg);
        assert_eq!(parse(r#"{"outputFormat":"PNG"}"#).output_format, OutputFormat::Png);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = parse_options(r#"{"outputFormat":"gif"}"#, Quality::DEFAULT).unwrap_err();
        assert!(matches!(err, OptionsError::Format(_)));
    }

    #[test]
    fn malformed_json_and_bad_toggles_are_rejected() {
        assert!(parse_options("not json", Quality::DEFAULT).is_err());
        assert!(parse_options("42", Quality::DEFAULT).is_err());
        assert!(parse_options(r#"{"sharpen":"yes"}"#, Quality::DEFAULT).is_err());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        assert!(parse(r#"{"vignette":true,"sharpen":true}"#).sharpen);
    }
}
