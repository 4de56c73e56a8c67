//! Decoding uploads and encoding artifacts.
//!
//! | Direction | Implementation |
//! |---|---|
//! | **Decode** | `image::ImageReader` with content sniffing, converted to RGB8 |
//! | **Encode JPEG** | `JpegEncoder::new_with_quality` |
//! | **Encode PNG** | `PngEncoder::new_with_quality`, level mapped to a compression preset |
//!
//! Artifacts are written to a sibling temporary file and renamed into place,
//! so a reader never observes a half-written file.

use super::error::ImagingError;
use super::params::{EncodeParams, OutputFormat, PngCompression};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageReader, RgbImage};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Decode any supported raster format into a 3-channel 8-bit buffer.
///
/// The format is detected from the content, not the file name.
pub fn decode(path: &Path) -> Result<RgbImage, ImagingError> {
    let img = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ImagingError::Decode(format!("{}: {e}", path.display())))?;
    Ok(img.to_rgb8())
}

/// Map a 0-9 level onto the presets the PNG encoder exposes.
fn png_compression_type(level: PngCompression) -> CompressionType {
    match level.level() {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

/// Encode `img` into memory.
pub fn encode(img: &RgbImage, params: &EncodeParams) -> Result<Vec<u8>, ImagingError> {
    let mut buf = Vec::new();
    write_encoded(img, params, &mut buf)?;
    Ok(buf)
}

fn write_encoded<W: Write>(
    img: &RgbImage,
    params: &EncodeParams,
    writer: W,
) -> Result<(), ImagingError> {
    let (w, h) = img.dimensions();
    let result = match params.format {
        OutputFormat::Jpeg => {
            JpegEncoder::new_with_quality(writer, params.jpeg_quality.value()).write_image(
                img.as_raw(),
                w,
                h,
                ExtendedColorType::Rgb8,
            )
        }
        OutputFormat::Png => PngEncoder::new_with_quality(
            writer,
            png_compression_type(params.png_compression),
            FilterType::Adaptive,
        )
        .write_image(img.as_raw(), w, h, ExtendedColorType::Rgb8),
    };
    result.map_err(|e| ImagingError::Encode(format!("{}: {e}", params.format)))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Encode `img` and atomically place it at `path`.
pub fn encode_to_path(
    img: &RgbImage,
    params: &EncodeParams,
    path: &Path,
) -> Result<(), ImagingError> {
    let tmp = temp_path(path);
    let written = write_then_rename(img, params, &tmp, path);
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

fn write_then_rename(
    img: &RgbImage,
    params: &EncodeParams,
    tmp: &Path,
    path: &Path,
) -> Result<(), ImagingError> {
    let mut writer = BufWriter::new(fs::File::create(tmp)?);
    write_encoded(img, params, &mut writer)?;
    writer.flush()?;
    drop(writer);
    fs::rename(tmp, path)?;
    Ok(())
}
