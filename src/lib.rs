//! # edgequake-docflow
//!
//! Enrich, translate and export converted documents.
//!
//! A structural extractor turns an office, image or PDF file into a
//! [`DocumentTree`]. This crate takes it from there: it reads the text inside
//! pictures and tables with a vision model, translates every text leaf with a
//! bounded fan-out, exports markdown / JSON / YAML / plain text, and reports
//! every step of every file to a Task-Store and to the caller.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Dispatch   extension → format group → converter options
//!  ├─ 2. Convert    structural extractor on a small blocking pool
//!  ├─ 3. Normalise  mojibake, invisible characters, hex escapes
//!  ├─ 4. Enrich     one bounded vision call per picture/table
//!  ├─ 5. Translate  every text leaf and cell, N in flight, positional rejoin
//!  └─ 6. Export     markdown / json / yaml / text + element images
//! ```
//!
//! Each file is one task: `PENDING → PROCESSING → READY | ERROR`, with
//! progress checkpoints at 0.1, 0.33, 0.66, 0.99 and 1.0.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docflow::{PipelineConfig, Services, Session, SessionRequest};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let services = Services::local("out");
//!     let request = SessionRequest::new(vec!["notes.txt".into()]);
//!
//!     let (mut events, handle) = Session::new(config, services).run(request);
//!     while let Some(event) = events.next().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     let report = handle.await?;
//!     eprintln!("{} files done", report.files.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docflow` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docflow = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod services;
pub mod stream;
pub mod walker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{FailurePolicy, PipelineConfig, PipelineConfigBuilder, RetryPolicy, ServiceEndpoints};
pub use convert::{convert_document, process_file, FileOptions, OutputMode};
pub use document::{Cell, DocumentTree, ImageRef, Node, NodePath, PictureNode, TableNode, TextLabel, TextNode};
pub use error::{DocflowError, NodeError};
pub use output::{FileFailure, FileResult, PipelineOutput, SessionReport};
pub use pipeline::enrich::{EnrichOptions, EnrichmentReport, EnrichmentStage};
pub use pipeline::export::{export, ExportFormat, ExportOptions, ImageMode};
pub use pipeline::translate::{TranslationReport, TranslationStage};
pub use progress::{Checkpoint, ProgressTracker, Task, TaskObserver, TaskStatus};
pub use services::Services;
pub use stream::{EventStream, Session, SessionEvent, SessionRequest};
pub use walker::walk;
