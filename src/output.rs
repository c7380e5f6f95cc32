//! Result types returned by the pipeline.

use crate::document::DocumentTree;
use crate::pipeline::enrich::EnrichmentReport;
use crate::pipeline::translate::TranslationReport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything produced for one successfully processed file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    pub filename: String,
    /// Task-Store key of the file's task.
    pub task_key: String,
    /// Plain text of the final document: translated when translation ran.
    pub text: String,
    /// Empty when no summarizer is configured.
    pub summary: String,
    /// Stored `pictures/picture-N.png` artifacts.
    pub images: Vec<PathBuf>,
    /// Stored `tables/table-N.png` artifacts.
    pub tables: Vec<PathBuf>,
    /// Original export, then the translated one if any.
    pub exports: Vec<PathBuf>,
    /// Number of text leaves in the converted tree.
    pub leaf_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<TranslationReport>,
    pub duration_ms: u64,
}

/// A file that ended in `ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub filename: String,
    /// Stable error kind, see [`crate::error::DocflowError::kind`].
    pub kind: String,
    pub message: String,
}

/// Outcome of a whole session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub files: Vec<FileResult>,
    pub failures: Vec<FileFailure>,
    /// Files never attempted: fail-fast stop or cancellation.
    pub skipped: Vec<String>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl SessionReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty() && !self.cancelled
    }
}

/// What [`crate::convert::convert_document`] hands back, one variant per
/// [`crate::convert::OutputMode`].
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutput {
    /// Rendered markdown.
    Text(String),
    /// Where the export was written.
    File(PathBuf),
    /// The enriched tree, for callers that export it themselves.
    Tree(DocumentTree),
}
