//! # Photo Enhancer
//!
//! Enhances one photograph at a time: a fixed sequence of pixel transforms
//! selected per request, followed by PNG or JPEG encoding.
//!
//! # Architecture: Fixed-Order Pipeline
//!
//! ```text
//! upload bytes + options JSON
//!     │
//!     ▼
//! decode ─▶ sharpen ─▶ denoise ─▶ color correction ─▶ super-resolution ─▶ beautify ─▶ encode
//!                        │                                   │                 │
//!                 proxy above 1600px               Upscaler trait     FaceDetector trait
//! ```
//!
//! Each stage is a function from buffer to buffer and knows nothing about
//! the others. The orchestrator threads the buffer through the enabled
//! stages and checks each result's size before moving on.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Stage implementations, codecs, the upscaler and face detector seams |
//! | [`pipeline`] | Orchestrator: decode, run stages in order, encode, report |
//! | [`options`] | Decoding the per-request options JSON |
//! | [`storage`] | Request-scoped directories for inputs and artifacts |
//! | [`service`] | Upload / fetch boundary with HTTP-style status mapping |
//! | [`config`] | `config.toml` loading, validation and stock defaults |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Request-Scoped Artifacts
//!
//! Every upload gets a UUID and writes under `<storage>/<id>/`. Two requests
//! for the same output format never touch the same file, and artifacts are
//! renamed into place so a fetch never sees a partial write.
//!
//! ## Explicit Results
//!
//! Every stage and the orchestrator return `Result`. The only failure that is
//! recovered locally is a missing face model: beautify is best-effort and
//! skips itself, recording why in the run report.
//!
//! ## One Configuration Struct
//!
//! Blur sigmas, filter strengths, window sizes, the denoise threshold and
//! encoder levels all live in [`config::EnhanceConfig`], validated once at
//! startup and passed by reference to each stage.
//!
//! ## Injected Models
//!
//! Upscaling and face detection sit behind traits
//! ([`imaging::Upscaler`], [`imaging::FaceDetector`]). The shipped
//! implementations are cubic interpolation and a Haar cascade; tests inject
//! deterministic stubs.

pub mod config;
pub mod imaging;
pub mod options;
pub mod output;
pub mod pipeline;
pub mod service;
pub mod storage;
