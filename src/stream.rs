//! Streaming multi-file sessions.
//!
//! A [`Session`] takes one [`SessionRequest`], processes its files one after
//! another and pushes [`SessionEvent`]s as each task moves:
//!
//! ```text
//! {"type":"info",            "body":{"filename":…,"status":"PROCESSING","progress":0.33,…}}
//! {"type":"error",           "body":{"filename":…,"kind":"service-unavailable","message":…}}
//! {"type":"file-ended",      "body":"report.pdf"}
//! {"type":"all-files-ended", "body":{"files":[…],"failures":[…],…}}
//! ```
//!
//! ## Disconnects
//!
//! Dropping the [`EventStream`] is a disconnect: the session's cancellation
//! token fires, translation stops dispatching, and no further file starts.
//! Calls already in flight finish.
//!
//! ## Failure policy
//!
//! With [`FailurePolicy::FailFast`] (the default) the first failed file ends
//! the session and the remaining files are reported as skipped.
//! [`FailurePolicy::ContinueOnError`] reports the failure and moves on.

use crate::config::{FailurePolicy, PipelineConfig};
use crate::convert::{process_file, FileOptions};
use crate::error::DocflowError;
use crate::output::{FileFailure, SessionReport};
use crate::pipeline::enrich::EnrichOptions;
use crate::pipeline::export::ExportFormat;
use crate::pipeline::extract::ConversionPool;
use crate::progress::{ProgressTracker, Task, TaskObserver, TaskStatus};
use crate::services::Services;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Events of one session, in emission order.
pub type EventStream = Pin<Box<dyn Stream<Item = SessionEvent> + Send>>;

// ── Request ──────────────────────────────────────────────────────────────

fn default_user() -> String {
    "guest".to_string()
}

/// The client's one initial message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
    /// Produce a translated export too. Needs `target_lang`.
    #[serde(default)]
    pub translated: bool,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default = "default_format")]
    pub output_format: ExportFormat,
    /// Which elements to read with the vision service.
    #[serde(default)]
    pub elements: EnrichOptions,
    #[serde(default = "default_user")]
    pub user_id: String,
}

fn default_format() -> ExportFormat {
    ExportFormat::Markdown
}

impl SessionRequest {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            source_lang: None,
            target_lang: None,
            translated: false,
            max_pages: None,
            output_format: ExportFormat::Markdown,
            elements: EnrichOptions::default(),
            user_id: default_user(),
        }
    }

    pub fn validate(&self) -> Result<(), DocflowError> {
        if self.files.is_empty() {
            return Err(DocflowError::InvalidRequest("no files given".into()));
        }
        if self.max_pages == Some(0) {
            return Err(DocflowError::InvalidRequest("max_pages must be at least 1".into()));
        }
        let has_target = self
            .target_lang
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if self.translated && !has_target {
            return Err(DocflowError::InvalidRequest(
                "translation requested without a target language".into(),
            ));
        }
        if self.user_id.trim().is_empty() {
            return Err(DocflowError::InvalidRequest("user_id must not be empty".into()));
        }
        Ok(())
    }

    fn file_options(&self) -> FileOptions {
        FileOptions {
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone().filter(|_| self.translated),
            max_pages: self.max_pages,
            format: self.output_format,
            elements: self.elements,
        }
    }
}

// ── Events ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoBody {
    pub filename: String,
    pub status: TaskStatus,
    pub progress: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// `None` for request-level errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "kebab-case")]
pub enum SessionEvent {
    Info(InfoBody),
    Error(ErrorBody),
    /// Body is the file name.
    FileEnded(String),
    AllFilesEnded(SessionReport),
}

/// Sending half of a session's event channel.
///
/// A failed send means the client is gone, which cancels the session.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() && !self.cancel.is_cancelled() {
            warn!("Event receiver dropped, cancelling session");
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Echoes one file's task transitions as `info` events.
struct FileObserver {
    filename: String,
    sink: EventSink,
}

impl FileObserver {
    fn info(&self, task: &Task, message: Option<&str>) -> SessionEvent {
        SessionEvent::Info(InfoBody {
            filename: self.filename.clone(),
            status: task.progress.status,
            progress: task.progress.progress,
            message: message.map(String::from),
        })
    }
}

impl TaskObserver for FileObserver {
    fn on_transition(&self, task: &Task) {
        self.sink.emit(self.info(task, None));
    }

    fn on_message(&self, task: &Task, message: &str) {
        self.sink.emit(self.info(task, Some(message)));
    }
}

// ── Session ──────────────────────────────────────────────────────────────

/// One client-driven, multi-file processing run.
///
/// Owns its configuration and services; the conversion pool and
/// cancellation token are created fresh for every run.
pub struct Session {
    config: PipelineConfig,
    services: Services,
}

impl Session {
    pub fn new(config: PipelineConfig, services: Services) -> Self {
        Self { config, services }
    }

    /// Start processing `request` in the background.
    ///
    /// The stream ends after `all-files-ended`; the handle resolves to the
    /// same report.
    pub fn run(self, request: SessionRequest) -> (EventStream, JoinHandle<SessionReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let sink = EventSink {
            tx,
            cancel: cancel.clone(),
        };

        // Notice a disconnect even while no event is being sent.
        let watcher = {
            let tx = sink.tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tx.closed() => {
                        info!("Client disconnected");
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            })
        };

        let handle = tokio::spawn(async move {
            let report = self.drive(&request, &sink, &cancel).await;
            sink.emit(SessionEvent::AllFilesEnded(report.clone()));
            watcher.abort();
            report
        });

        (Box::pin(UnboundedReceiverStream::new(rx)), handle)
    }

    async fn drive(
        &self,
        request: &SessionRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> SessionReport {
        let start = Instant::now();
        let mut report = SessionReport::default();

        if let Err(e) = request.validate() {
            warn!("Rejected session request: {}", e);
            sink.emit(SessionEvent::Error(ErrorBody {
                filename: None,
                kind: e.kind().to_string(),
                message: e.to_string(),
            }));
            report.skipped = request.files.iter().map(|p| file_name(p)).collect();
            return report;
        }

        info!(
            "Session started: {} files for user '{}'",
            request.files.len(),
            request.user_id
        );
        let options = request.file_options();
        let pool = ConversionPool::new(self.config.conversion_workers, self.config.raises_on_error);

        for (i, path) in request.files.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.skipped = remaining(&request.files[i..]);
                break;
            }

            let filename = file_name(path);
            let observer = Arc::new(FileObserver {
                filename: filename.clone(),
                sink: sink.clone(),
            });
            let mut tracker = ProgressTracker::create(
                Arc::clone(&self.services.tasks),
                observer,
                &request.user_id,
                &self.config.service_name,
            )
            .await;

            match process_file(
                path,
                &options,
                &self.config,
                &self.services,
                &pool,
                &mut tracker,
                cancel,
            )
            .await
            {
                Ok(result) => {
                    sink.emit(SessionEvent::FileEnded(filename));
                    report.files.push(result);
                }
                Err(e) => {
                    error!("{} failed: {}", filename, e);
                    sink.emit(SessionEvent::Error(ErrorBody {
                        filename: Some(filename.clone()),
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    }));
                    report.failures.push(FileFailure {
                        filename,
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });

                    if matches!(e, DocflowError::Cancelled) || cancel.is_cancelled() {
                        report.cancelled = true;
                        report.skipped = remaining(&request.files[i + 1..]);
                        break;
                    }
                    if self.config.failure_policy == FailurePolicy::FailFast {
                        report.skipped = remaining(&request.files[i + 1..]);
                        break;
                    }
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Session ended: {} ok, {} failed, {} skipped in {}ms",
            report.files.len(),
            report.failures.len(),
            report.skipped.len(),
            report.duration_ms
        );
        report
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn remaining(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| file_name(p)).collect()
}
