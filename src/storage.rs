//! Request-scoped file storage.
//!
//! Every upload gets a fresh [`RequestId`] and its own directory:
//!
//! ```text
//! <storage_dir>/
//! └── 3f2c…-…/                # one directory per request id
//!     ├── input               # uploaded bytes, only while the pipeline runs
//!     └── processed.png       # or processed.jpg, the finished artifact
//! ```
//!
//! The input is dropped once the artifact is written, and a request that
//! fails leaves no directory behind.
//!
//! Request ids are UUIDs and are parsed before any path is built, so an id
//! from a client can never escape the storage root.

use crate::imaging::OutputFormat;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

const INPUT_NAME: &str = "input";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid request id '{0}'")]
    InvalidId(String),
    #[error("no {format} artifact for request {id}")]
    NotFound { id: RequestId, format: OutputFormat },
}

/// Identifier scoping one upload's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for RequestId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| StorageError::InvalidId(s.to_string()))
    }
}

/// Encoded artifact read back for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
}

/// Root directory holding one subdirectory per request.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Use `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn request_dir(&self, id: RequestId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn input_path(&self, id: RequestId) -> PathBuf {
        self.request_dir(id).join(INPUT_NAME)
    }

    pub fn artifact_path(&self, id: RequestId, format: OutputFormat) -> PathBuf {
        self.request_dir(id).join(format.artifact_name())
    }

    /// Create the request directory and store the uploaded bytes.
    pub fn save_input(&self, id: RequestId, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(self.request_dir(id))?;
        let path = self.input_path(id);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Delete the stored upload once it is no longer needed.
    pub fn discard_input(&self, id: RequestId) -> Result<(), StorageError> {
        match fs::remove_file(self.input_path(id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Delete everything stored for `id`.
    pub fn remove_request(&self, id: RequestId) -> Result<(), StorageError> {
        match fs::remove_dir_all(self.request_dir(id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Read a finished artifact.
    pub fn open_artifact(&self, id: RequestId, format: OutputFormat) -> Result<Artifact, StorageError> {
        let path = self.artifact_path(id, format);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound { id, format });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Artifact {
            bytes,
            content_type: format.content_type(),
            filename: format.artifact_name(),
        })
    }
}
