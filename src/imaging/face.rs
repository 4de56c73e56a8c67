//! Face detection seam.
//!
//! Beautify only needs "where are the faces", so detection is an injected
//! capability rather than a model loaded in place. [`load_detector`] turns a
//! configured cascade path into a detector; when the model is missing the
//! result is an [`UnavailableDetector`], which beautify treats as "skip".
//! [`LazyDetector`] defers that load to the first detection, so runs without
//! beautify never read the model.

use super::cascade::CascadeDetector;
use crate::config::BeautifyConfig;
use image::GrayImage;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("face detector unavailable: {0}")]
    Unavailable(String),
    #[error("face detection failed: {0}")]
    Failed(String),
}

/// Bounding box of a detected face, in pixels of the searched image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Multi-scale search settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    /// Ratio between consecutive pyramid levels.
    pub scale_factor: f32,
    /// Raw hits that must overlap before a region is reported.
    pub min_neighbors: u32,
    /// Smallest face edge considered.
    pub min_size: u32,
}

impl From<&BeautifyConfig> for DetectionParams {
    fn from(config: &BeautifyConfig) -> Self {
        Self {
            scale_factor: config.scale_factor,
            min_neighbors: config.min_neighbors,
            min_size: config.min_face_size,
        }
    }
}

/// Pluggable face detector.
pub trait FaceDetector: Send + Sync {
    /// Detect faces in a single-channel intensity image.
    fn detect(
        &self,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Detector that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaceDetector;

impl FaceDetector for NoFaceDetector {
    fn detect(&self, _: &GrayImage, _: &DetectionParams) -> Result<Vec<FaceRegion>, DetectorError> {
        Ok(Vec::new())
    }
}

/// Stand-in for a detector whose model could not be loaded.
#[derive(Debug, Clone)]
pub struct UnavailableDetector {
    reason: String,
}

impl UnavailableDetector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl FaceDetector for UnavailableDetector {
    fn detect(&self, _: &GrayImage, _: &DetectionParams) -> Result<Vec<FaceRegion>, DetectorError> {
        Err(DetectorError::Unavailable(self.reason.clone()))
    }
}

/// Where OpenCV packages install their cascade files.
const OPENCV_CASCADE_DIRS: [&str; 3] = [
    "/usr/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
];

/// Resolve a configured model path.
///
/// A relative path that does not exist is looked up by file name in the
/// OpenCV data directories. When nothing matches, `path` is returned as is.
fn resolve_model(path: &Path, search_dirs: &[&str]) -> PathBuf {
    if path.is_file() || path.is_absolute() {
        return path.to_path_buf();
    }
    path.file_name()
        .and_then(|name| {
            search_dirs
                .iter()
                .map(|dir| Path::new(dir).join(name))
                .find(|candidate| candidate.is_file())
        })
        .unwrap_or_else(|| path.to_path_buf())
}

/// Load the cascade at `path`, or fall back to an [`UnavailableDetector`].
pub fn load_detector(path: &Path) -> Arc<dyn FaceDetector> {
    let model = resolve_model(path, &OPENCV_CASCADE_DIRS);
    match CascadeDetector::load(&model) {
        Ok(detector) => {
            info!(
                model = %model.display(),
                stages = detector.stage_count(),
                "face cascade loaded"
            );
            Arc::new(detector)
        }
        Err(e) => {
            warn!(model = %path.display(), error = %e, "face cascade not loaded; beautify will be skipped");
            Arc::new(UnavailableDetector::new(e.to_string()))
        }
    }
}

/// Detector that loads its cascade on first use.
pub struct LazyDetector {
    path: PathBuf,
    loaded: OnceLock<Arc<dyn FaceDetector>>,
}

impl LazyDetector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: OnceLock::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }
}

impl fmt::Debug for LazyDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyDetector")
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl FaceDetector for LazyDetector {
    fn detect(
        &self,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        self.loaded
            .get_or_init(|| load_detector(&self.path))
            .detect(gray, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_yields_unavailable_detector() {
        let detector = load_detector(Path::new("/nonexistent/cascade.xml"));
        let params = DetectionParams::from(&BeautifyConfig::default());
        let result = detector.detect(&GrayImage::new(10, 10), &params);
        assert!(matches!(result, Err(DetectorError::Unavailable(_))));
    }

    #[test]
    fn no_face_detector_is_empty() {
        let params = DetectionParams::from(&BeautifyConfig::default());
        let faces = NoFaceDetector.detect(&GrayImage::new(100, 100), &params).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn params_follow_config() {
        let params = DetectionParams::from(&BeautifyConfig::default());
        assert_eq!(params.scale_factor, 1.1);
        assert_eq!(params.min_neighbors, 3);
        assert_eq!(params.min_size, 80);
    }

    #[test]
    fn xml_model_on_disk_loads() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cascade.xml");
        std::fs::write(&path, crate::imaging::cascade::tests::edge_cascade()).unwrap();

        let detector = load_detector(&path);
        let params = DetectionParams::from(&BeautifyConfig::default());
        assert!(detector.detect(&GrayImage::new(100, 100), &params).unwrap().is_empty());
    }

    #[test]
    fn lazy_detector_loads_on_first_detect() {
        let detector = LazyDetector::new("/nonexistent/cascade.xml");
        assert!(!detector.is_loaded());

        let params = DetectionParams::from(&BeautifyConfig::default());
        let result = detector.detect(&GrayImage::new(10, 10), &params);
        assert!(matches!(result, Err(DetectorError::Unavailable(_))));
        assert!(detector.is_loaded());
    }

    #[test]
    fn relative_model_falls_back_to_data_dirs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let installed = tmp.path().join("haarcascade_frontalface_default.xml");
        std::fs::write(&installed, "<opencv_storage/>").unwrap();
        let dirs = [tmp.path().to_str().unwrap()];

        let configured = Path::new("models/haarcascade_frontalface_default.xml");
        assert_eq!(resolve_model(configured, &dirs), installed);
        assert_eq!(
            resolve_model(Path::new("models/other.xml"), &dirs),
            PathBuf::from("models/other.xml")
        );
        let absolute = Path::new("/nonexistent/haarcascade_frontalface_default.xml");
        assert_eq!(resolve_model(absolute, &dirs), absolute);
    }
}
