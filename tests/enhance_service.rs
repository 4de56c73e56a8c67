//! End-to-end scenarios through the service boundary.
//!
//! Each test gets its own storage root in a temp directory and a service
//! with deterministic models injected: no face model on disk is needed.

use image::{ImageFormat, Rgb, RgbImage};
use photo_enhancer::config::EnhanceConfig;
use photo_enhancer::imaging::{CubicUpscaler, NoFaceDetector, OutputFormat, UnavailableDetector};
use photo_enhancer::pipeline::{Enhancer, Stage, StageDetail};
use photo_enhancer::service::Service;
use photo_enhancer::storage::ArtifactStore;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

fn service(root: &Path) -> Service {
    let enhancer = Enhancer::with_components(
        EnhanceConfig::default(),
        Arc::new(NoFaceDetector),
        Arc::new(CubicUpscaler::default()),
    );
    Service::new(enhancer, ArtifactStore::open(root).unwrap()).unwrap()
}

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
    })
}

fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

#[test]
fn gradient_upscaled_to_200_png() {
    let tmp = tempfile::TempDir::new().unwrap();
    let svc = service(tmp.path());
    let options = r#"{"sharpen":false,"denoise":false,"colorCorrection":false,
        "superResolution":true,"beautify":false,"outputFormat":"png"}"#;

    let resp = svc
        .upload(&encode(&gradient(100, 100), ImageFormat::Png), options)
        .unwrap();
    let artifact = svc
        .processed(&resp.request_id.to_string(), Some("png"))
        .unwrap();

    assert!(!artifact.bytes.is_empty());
    assert_eq!(artifact.content_type, "image/png");
    let decoded = image::load_from_memory_with_format(&artifact.bytes, ImageFormat::Png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (200, 200));
}

#[test]
fn passthrough_is_bit_identical_after_reencode() {
    let tmp = tempfile::TempDir::new().unwrap();
    let svc = service(tmp.path());
    let img = gradient(37, 23);

    let resp = svc.upload(&encode(&img, ImageFormat::Png), "{}").unwrap();
    let artifact = svc.processed(&resp.request_id.to_string(), None).unwrap();
    let decoded = image::load_from_memory(&artifact.bytes).unwrap().to_rgb8();
    assert_eq!(decoded, img);
}

#[test]
fn beautify_without_faces_keeps_dimensions() {
    let tmp = tempfile::TempDir::new().unwrap();
    let svc = service(tmp.path());

    let resp = svc
        .upload(&encode(&gradient(120, 90), ImageFormat::Png), r#"{"beautify":true}"#)
        .unwrap();
    assert_eq!(resp.report.output, resp.report.input);
    assert_eq!(resp.report.stages[0].stage, Stage::Beautify);
}

#[test]
fn missing_face_model_skips_beautify() {
    let tmp = tempfile::TempDir::new().unwrap();
    let enhancer = Enhancer::with_components(
        EnhanceConfig::default(),
        Arc::new(UnavailableDetector::new("cascade not found")),
        Arc::new(CubicUpscaler::default()),
    );
    let svc = Service::new(enhancer, ArtifactStore::open(tmp.path()).unwrap()).unwrap();

    let resp = svc
        .upload(&encode(&gradient(50, 50), ImageFormat::Png), r#"{"beautify":true}"#)
        .unwrap();
    assert!(matches!(
        &resp.report.stages[0].detail,
        StageDetail::Beautify { skipped: Some(_), .. }
    ));
}

/// OpenCV-format cascade with one feature that fires on "bright above dark".
const EDGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>5.0000000000000000e-01</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 5.0000000000000000e-01</internalNodes>
          <leafValues>
            0. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 24 12 1.</_>
        <_>
          0 12 24 12 -1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

#[test]
fn configured_xml_cascade_drives_beautify() {
    let tmp = tempfile::TempDir::new().unwrap();
    let model = tmp.path().join("cascade.xml");
    std::fs::write(&model, EDGE_CASCADE).unwrap();

    let mut config = EnhanceConfig::default();
    config.beautify.cascade_model = model;
    config.service.storage_dir = tmp.path().join("uploads");
    let svc = Service::from_config(config).unwrap();

    let img = RgbImage::from_fn(200, 200, |_, y| {
        if y < 100 { Rgb([250, 250, 250]) } else { Rgb([5, 5, 5]) }
    });
    let resp = svc
        .upload(&encode(&img, ImageFormat::Png), r#"{"beautify":true}"#)
        .unwrap();

    match &resp.report.stages[0].detail {
        StageDetail::Beautify { faces, skipped } => {
            assert!(skipped.is_none(), "beautify skipped: {skipped:?}");
            assert!(*faces >= 1);
        }
        other => panic!("unexpected detail {other:?}"),
    }
    assert_eq!(resp.report.output, resp.report.input);
}

#[test]
fn jpeg_quality_is_clamped_to_default() {
    let tmp = tempfile::TempDir::new().unwrap();
    let svc = service(tmp.path());
    let img = RgbImage::from_fn(64, 64, |x, y| {
        Rgb([((x * 37 + y * 11) % 256) as u8, ((x ^ y) * 4) as u8, (y * 3) as u8])
    });
    let bytes = encode(&img, ImageFormat::Png);

    let size_for = |options: &str| {
        let resp = svc.upload(&bytes, options).unwrap();
        svc.processed(&resp.request_id.to_string(), Some("jpeg"))
            .unwrap()
            .bytes
            .len()
    };

    let default = size_for(r#"{"outputFormat":"jpeg"}"#);
    assert_eq!(size_for(r#"{"outputFormat":"jpeg","jpegQuality":0}"#), default);
    assert_eq!(size_for(r#"{"outputFormat":"jpeg","jpegQuality":-5}"#), default);
    assert_eq!(size_for(r#"{"outputFormat":"jpeg","jpegQuality":95}"#), default);
    assert!(size_for(r#"{"outputFormat":"jpeg","jpegQuality":42}"#) < default);
}

#[test]
fn fetching_a_format_never_produced_is_not_found() {
    let tmp = tempfile::TempDir::new().unwrap();
    let svc = service(tmp.path());
    let resp = svc
        .upload(&encode(&gradient(16, 16), ImageFormat::Png), r#"{"outputFormat":"png"}"#)
        .unwrap();

    let err = svc
        .processed(&resp.request_id.to_string(), Some("jpeg"))
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[test]
fn jpeg_input_is_accepted() {
    let tmp = tempfile::TempDir::new().unwrap();
    let svc = service(tmp.path());
    let resp = svc
        .upload(
            &encode(&gradient(40, 30), ImageFormat::Jpeg),
            r#"{"sharpen":true,"colorCorrection":true,"outputFormat":"jpg"}"#,
        )
        .unwrap();
    assert_eq!(resp.report.format, OutputFormat::Jpeg);
    assert!(resp.processed_image_url.ends_with("format=jpeg"));
}

#[test]
fn concurrent_uploads_get_separate_artifacts() {
    let tmp = tempfile::TempDir::new().unwrap();
    let svc = service(tmp.path());
    let sizes = [(20u32, 10u32), (30, 15), (40, 20), (50, 25)];

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = sizes
            .iter()
            .map(|&(w, h)| {
                let svc = &svc;
                s.spawn(move || {
                    let resp = svc
                        .upload(
                            &encode(&gradient(w, h), ImageFormat::Png),
                            r#"{"superResolution":true}"#,
                        )
                        .unwrap();
                    (w, h, resp.request_id)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut ids: Vec<_> = results.iter().map(|r| r.2).collect();
    ids.sort_by_key(|id| id.to_string());
    ids.dedup();
    assert_eq!(ids.len(), sizes.len());

    for (w, h, id) in results {
        let artifact = svc.processed(&id.to_string(), None).unwrap();
        let decoded = image::load_from_memory(&artifact.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (w * 2, h * 2));
    }
}
