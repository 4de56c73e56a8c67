//! Transport-free service boundary.
//!
//! Models the two routes of the upload service as methods:
//!
//! | Route | Method |
//! |---|---|
//! | `POST /api/upload` (fields `file`, `options`) | [`Service::upload`] |
//! | `GET /api/processed?id=<id>&format=<fmt>` | [`Service::processed`] |
//!
//! A transport layer only has to move bytes in and out and turn a
//! [`ServiceError`] into a response using [`ServiceError::status_code`].
//!
//! Uploads run on a dedicated rayon pool sized by `service.max_workers`, so
//! at most that many pipelines execute at once no matter how many callers
//! block in [`Service::upload`].

use crate::config::{ConfigError, EnhanceConfig, effective_workers};
use crate::imaging::{OutputFormat, Quality};
use crate::options::{OptionsError, parse_options};
use crate::pipeline::{EnhanceError, EnhanceReport, Enhancer, ErrorKind, enhance};
use crate::storage::{Artifact, ArtifactStore, RequestId, StorageError};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unprocessable image: {0}")]
    Unprocessable(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ServiceError {
    /// HTTP status a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) | ServiceError::InvalidOptions(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Unprocessable(_) => 422,
            ServiceError::Internal(_) | ServiceError::Config(_) => 500,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidId(_) => ServiceError::BadRequest(e.to_string()),
            StorageError::NotFound { .. } => ServiceError::NotFound(e.to_string()),
            StorageError::Io(_) => ServiceError::Internal(e.to_string()),
        }
    }
}

impl From<EnhanceError> for ServiceError {
    fn from(e: EnhanceError) -> Self {
        match e.kind() {
            ErrorKind::Decode => ServiceError::Unprocessable(e.to_string()),
            ErrorKind::Stage | ErrorKind::Encode | ErrorKind::Io => {
                ServiceError::Internal(e.to_string())
            }
        }
    }
}

/// Body returned from a successful upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub request_id: RequestId,
    pub processed_image_url: String,
    #[serde(skip)]
    pub report: EnhanceReport,
}

/// URL at which an artifact can be fetched.
pub fn processed_url(id: RequestId, format: OutputFormat) -> String {
    format!("/api/processed?id={id}&format={format}")
}

pub struct Service {
    enhancer: Enhancer,
    store: ArtifactStore,
    pool: rayon::ThreadPool,
}

impl Service {
    pub fn new(enhancer: Enhancer, store: ArtifactStore) -> Result<Self, ServiceError> {
        let workers = effective_workers(&enhancer.config().service);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("enhance-{i}"))
            .build()
            .map_err(|e| ServiceError::Internal(format!("worker pool: {e}")))?;
        info!(workers, storage = %store.root().display(), "service ready");
        Ok(Self {
            enhancer,
            store,
            pool,
        })
    }

    /// Build from configuration: storage from `service.storage_dir`,
    /// detector from `beautify.cascade_model`.
    pub fn from_config(config: EnhanceConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let store = ArtifactStore::open(&config.service.storage_dir)?;
        Self::new(Enhancer::new(config), store)
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Store an upload, enhance it and report where the artifact lives.
    ///
    /// Only the artifact outlives the call. A failed run removes its request
    /// directory.
    pub fn upload(&self, file: &[u8], options_json: &str) -> Result<UploadResponse, ServiceError> {
        let result = self.try_upload(file, options_json);
        if let Err(e) = &result {
            warn!(status = e.status_code(), error = %e, "upload failed");
        }
        result
    }

    fn try_upload(&self, file: &[u8], options_json: &str) -> Result<UploadResponse, ServiceError> {
        if file.is_empty() {
            return Err(ServiceError::BadRequest("missing or empty 'file' field".into()));
        }
        if options_json.trim().is_empty() {
            return Err(ServiceError::BadRequest(
                "missing or empty 'options' field".into(),
            ));
        }
        let default_quality = Quality::new(self.enhancer.config().output.default_jpeg_quality);
        let options = parse_options(options_json, default_quality)?;

        let id = RequestId::generate();
        let input = self.store.save_input(id, file)?;
        let output = self.store.artifact_path(id, options.output_format);
        info!(request = %id, bytes = file.len(), ?options, "upload accepted");

        let report = match self
            .pool
            .install(|| enhance(&input, &output, &options, &self.enhancer))
        {
            Ok(report) => report,
            Err(e) => {
                if let Err(cleanup) = self.store.remove_request(id) {
                    warn!(request = %id, error = %cleanup, "failed to remove request directory");
                }
                return Err(e.into());
            }
        };
        if let Err(e) = self.store.discard_input(id) {
            warn!(request = %id, error = %e, "failed to discard input");
        }

        Ok(UploadResponse {
            request_id: id,
            processed_image_url: processed_url(id, options.output_format),
            report,
        })
    }

    /// Fetch an artifact. A missing `format` means PNG.
    pub fn processed(&self, id: &str, format: Option<&str>) -> Result<Artifact, ServiceError> {
        let id: RequestId = id.parse()?;
        let format = match format {
            None => OutputFormat::default(),
            Some(f) => f
                .parse()
                .map_err(|e: crate::imaging::UnknownFormat| ServiceError::BadRequest(e.to_string()))?,
        };
        Ok(self.store.open_artifact(id, format)?)
    }
}
