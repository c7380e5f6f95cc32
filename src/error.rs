//! Error types for the edgequake-docflow library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DocflowError`]: **Fatal** for one file: the file cannot be finished
//!   (unsupported extension, converter failure, vision service down). Returned
//!   as `Err(DocflowError)` and ends that file's task as `ERROR`.
//!
//! * [`NodeError`]: **Non-fatal**: a single picture, table or text leaf
//!   could not be processed. Recorded in the stage reports while the file
//!   continues with degraded content (empty text, placeholder, original text).

use std::path::PathBuf;
use thiserror::Error;

/// All file-level errors returned by the pipeline.
#[derive(Debug, Error)]
pub enum DocflowError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The file extension does not belong to any known format group.
    #[error("Unsupported format '{extension}' for '{path}'")]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// Input file was not found at the given path.
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// The session request failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The structural extractor could not convert the file.
    #[error("Conversion failed for '{path}': {detail}")]
    ConversionError { path: PathBuf, detail: String },

    // ── Remote service errors ─────────────────────────────────────────────
    /// A remote dependency is unreachable or answered with an HTTP error.
    #[error("Service '{service}' is unavailable: {detail}")]
    ServiceUnavailable { service: String, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Serialising a document tree failed.
    #[error("Export to {format} failed: {detail}")]
    ExportFailed { format: String, detail: String },

    /// Could not create or write an output artifact.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Session errors ────────────────────────────────────────────────────
    /// The owning session was cancelled (client disconnected).
    #[error("Session cancelled")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocflowError {
    /// Stable, kebab-case identifier used in streamed `error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            DocflowError::UnsupportedFormat { .. } => "unsupported-format",
            DocflowError::FileNotFound { .. } => "file-not-found",
            DocflowError::InvalidRequest(_) => "invalid-request",
            DocflowError::ConversionError { .. } => "conversion-error",
            DocflowError::ServiceUnavailable { .. } => "service-unavailable",
            DocflowError::ExportFailed { .. } => "export-failed",
            DocflowError::OutputWriteFailed { .. } => "output-write-failed",
            DocflowError::InvalidConfig(_) => "invalid-config",
            DocflowError::Cancelled => "cancelled",
            DocflowError::Internal(_) => "internal-error",
        }
    }
}

/// A non-fatal error for a single node or leaf.
///
/// Stored in [`crate::pipeline::enrich::EnrichmentReport`] and
/// [`crate::pipeline::translate::TranslationReport`]; the file continues.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum NodeError {
    /// The picture or table carries no raster image.
    #[error("Node {path}: no image attached")]
    MissingImage { path: String },

    /// The raster could not be decoded or re-encoded.
    #[error("Node {path}: image processing failed: {detail}")]
    ImageFailed { path: String, detail: String },

    /// The vision service answered with something unusable.
    #[error("Node {path}: malformed vision response: {detail}")]
    MalformedResponse { path: String, detail: String },

    /// The vision call exceeded its budget; a placeholder was inserted.
    #[error("Node {path}: vision call timed out after {secs}s")]
    VisionTimeout { path: String, secs: u64 },

    /// A translation unit gave up; its original text was kept.
    #[error("Unit {index}: translation failed after {attempts} attempt(s): {detail}")]
    TranslationFailed {
        index: usize,
        attempts: u32,
        detail: String,
    },
}
