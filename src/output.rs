//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Enhance
//!
//! ```text
//! Request 3f2c9a4e-…
//!     URL: /api/processed?id=3f2c9a4e-…&format=png
//! Enhanced 1920x1080 → 3840x2160 (png)
//! 001 denoise 1920x1080
//!     Working size: 1600x900 (downscaled)
//! 002 super-resolution 1920x1080 → 3840x2160
//!     Factor: 2
//! 003 beautify 3840x2160
//!     Faces: 1
//!     Output: uploads/3f2c9a4e-…/processed.png
//! ```
//!
//! ## Fetch
//!
//! ```text
//! processed.png (image/png, 48213 bytes) → out.png
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::pipeline::{EnhanceReport, StageDetail, StageReport};
use crate::service::UploadResponse;
use crate::storage::Artifact;
use std::path::Path;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Header line for one stage: size change shown only when it happened.
///
/// ```text
/// 001 sharpen 640x480
/// 002 super-resolution 640x480 → 1280x960
/// ```
fn stage_header(index: usize, report: &StageReport) -> String {
    if report.input == report.output {
        format!("{} {} {}", format_index(index), report.stage, report.input)
    } else {
        format!(
            "{} {} {} \u{2192} {}",
            format_index(index),
            report.stage,
            report.input,
            report.output
        )
    }
}

fn detail_lines(detail: &StageDetail) -> Vec<String> {
    match detail {
        StageDetail::None => Vec::new(),
        StageDetail::Denoise {
            working,
            downscaled,
        } => {
            let note = if *downscaled { " (downscaled)" } else { "" };
            vec![format!("{}Working size: {}{}", indent(1), working, note)]
        }
        StageDetail::Upscale { factor } => vec![format!("{}Factor: {}", indent(1), factor)],
        StageDetail::Beautify {
            skipped: Some(reason),
            ..
        } => vec![format!("{}Skipped: {}", indent(1), reason)],
        StageDetail::Beautify { faces, .. } => vec![format!("{}Faces: {}", indent(1), faces)],
    }
}

/// Format a pipeline report.
pub fn format_report(report: &EnhanceReport) -> Vec<String> {
    let mut lines = Vec::new();
    if report.input == report.output {
        lines.push(format!("Enhanced {} ({})", report.input, report.format));
    } else {
        lines.push(format!(
            "Enhanced {} \u{2192} {} ({})",
            report.input, report.output, report.format
        ));
    }
    if report.stages.is_empty() {
        lines.push(format!("{}No stages enabled, re-encoded only", indent(1)));
    }
    for (i, stage) in report.stages.iter().enumerate() {
        lines.push(stage_header(i + 1, stage));
        lines.extend(detail_lines(&stage.detail));
    }
    lines.push(format!(
        "{}Output: {}",
        indent(1),
        report.output_path.display()
    ));
    lines
}

/// Format an upload response followed by its report.
pub fn format_upload(response: &UploadResponse) -> Vec<String> {
    let mut lines = vec![
        format!("Request {}", response.request_id),
        format!("{}URL: {}", indent(1), response.processed_image_url),
    ];
    lines.extend(format_report(&response.report));
    lines
}

/// Format the line confirming a fetched artifact was written.
pub fn format_fetch(artifact: &Artifact, dest: &Path) -> String {
    format!(
        "{} ({}, {} bytes) \u{2192} {}",
        artifact.filename,
        artifact.content_type,
        artifact.bytes.len(),
        dest.display()
    )
}

/// Print an upload response to stdout.
pub fn print_upload(response: &UploadResponse) {
    for line in format_upload(response) {
        println!("{}", line);
    }
}

/// Print a fetch confirmation to stdout.
pub fn print_fetch(artifact: &Artifact, dest: &Path) {
    println!("{}", format_fetch(artifact, dest));
}
