//! Per-file pipeline and the single-document entry point.
//!
//! [`process_file`] is what a session runs for every file: it drives the
//! file's [`ProgressTracker`] through every checkpoint and stores exports
//! and element images through the [`ArtifactStore`]. [`convert_document`]
//! is the simpler library API: one file, no task, output chosen by
//! [`OutputMode`].
//!
//! ## Stored layout
//!
//! ```text
//! {source_lang}/{format}/{stem}/{stem}.{ext}
//! {source_lang}/{format}/{stem}/{stem}-translated-{target}.{ext}
//! {source_lang}/{format}/{stem}/pictures/picture-N.png
//! {source_lang}/{format}/{stem}/tables/table-N.png
//! ```
//!
//! Keeping images beside the exports lets `Referenced` markdown links resolve.

use crate::config::PipelineConfig;
use crate::document::DocumentTree;
use crate::error::DocflowError;
use crate::normalize::normalize_tree;
use crate::output::{FileResult, PipelineOutput};
use crate::pipeline::dispatch::FormatDispatcher;
use crate::pipeline::enrich::{EnrichOptions, EnrichmentStage};
use crate::pipeline::export::{self, element_images, ExportFormat, ExportOptions, ImageMode};
use crate::pipeline::extract::ConversionPool;
use crate::pipeline::translate::TranslationStage;
use crate::progress::{Checkpoint, ProgressTracker, TransitionError};
use crate::services::artifacts::{write_atomic, ArtifactStore};
use crate::services::summarizer::summarize_or_fallback;
use crate::services::translator::LanguagePair;
use crate::services::Services;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-file choices, taken from the session request.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOptions {
    pub source_lang: Option<String>,
    /// `Some` requests a translated export in this language.
    pub target_lang: Option<String>,
    pub max_pages: Option<u32>,
    pub format: ExportFormat,
    pub elements: EnrichOptions,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            source_lang: None,
            target_lang: None,
            max_pages: None,
            format: ExportFormat::Markdown,
            elements: EnrichOptions::default(),
        }
    }
}

impl FileOptions {
    fn source_dir(&self) -> &str {
        self.source_lang
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("auto")
    }

    fn wants_images(&self, mode: ImageMode) -> bool {
        !self.elements.is_empty() || mode != ImageMode::Placeholder
    }
}

/// What the single-document entry point returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Markdown as a string.
    Text,
    /// Write to this path; the format follows the extension (markdown when
    /// unknown).
    File(PathBuf),
    /// The enriched tree itself.
    Tree,
}

// ── Session pipeline ─────────────────────────────────────────────────────

/// Run one file through every stage, moving `tracker` to READY or ERROR.
///
/// # Errors
/// Any file-level failure. The tracker has already been moved to `ERROR`
/// with the error's message when this returns `Err`.
pub async fn process_file(
    path: &Path,
    options: &FileOptions,
    config: &PipelineConfig,
    services: &Services,
    pool: &ConversionPool,
    tracker: &mut ProgressTracker,
    cancel: &CancellationToken,
) -> Result<FileResult, DocflowError> {
    match run_stages(path, options, config, services, pool, tracker, cancel).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // A tracker that already reached a terminal state keeps it.
            let _ = tracker.fail(e.to_string()).await;
            Err(e)
        }
    }
}

async fn run_stages(
    path: &Path,
    options: &FileOptions,
    config: &PipelineConfig,
    services: &Services,
    pool: &ConversionPool,
    tracker: &mut ProgressTracker,
    cancel: &CancellationToken,
) -> Result<FileResult, DocflowError> {
    let start = Instant::now();
    let filename = file_name(path);
    tracker.start().await.map_err(transition)?;
    tracker.message(format!("Processing {filename}")).await;

    // ── Step 1: Conversion ───────────────────────────────────────────────
    let mut tree = extract_tree(path, options, config, services, pool).await?;
    let leaf_count = tree.leaf_count();
    tracker.advance(Checkpoint::Converted).await.map_err(transition)?;
    tracker
        .message(format!("Converted file ({leaf_count} text items)"))
        .await;
    ensure_live(cancel)?;

    // ── Step 2: Enrichment ───────────────────────────────────────────────
    let enrichment = if options.elements.is_empty() {
        None
    } else {
        let vision = services.vision.clone().ok_or_else(|| missing("vision"))?;
        let stage = EnrichmentStage::from_config(vision, config);
        let report = stage.enrich(&mut tree, &options.elements).await?;
        tracker
            .message(format!(
                "Found {} tables and {} pictures",
                report.tables, report.pictures
            ))
            .await;
        Some(report)
    };
    tracker.advance(Checkpoint::Enriched).await.map_err(transition)?;
    ensure_live(cancel)?;

    // ── Step 3: Translation ──────────────────────────────────────────────
    let mut translation = None;
    let mut translated_tree = None;
    if let Some(target) = &options.target_lang {
        let translator = services.translator.clone().ok_or_else(|| missing("translator"))?;
        let stage = TranslationStage::from_config(translator, config);
        let langs = LanguagePair::new(options.source_dir(), target.clone());
        let report = if config.translate_in_place {
            stage.translate_in_place(&mut tree, &langs, cancel).await
        } else {
            let (copy, report) = stage.translate(&tree, &langs, cancel).await;
            translated_tree = Some(copy);
            report
        };
        tracker
            .message(format!("Translated {} text items", report.translated))
            .await;
        translation = Some(report);
    }
    ensure_live(cancel)?;

    // ── Step 4: Export and store ─────────────────────────────────────────
    tracker.advance(Checkpoint::Finalizing).await.map_err(transition)?;
    let export_opts = ExportOptions::new(config.image_mode);
    let stem = tree.name.clone();
    let dir = PathBuf::from(options.source_dir())
        .join(options.format.to_string())
        .join(&stem);
    let ext = options.format.extension();
    let original_name = format!("{stem}.{ext}");
    let translated_name = options
        .target_lang
        .as_ref()
        .map(|target| format!("{stem}-translated-{target}.{ext}"));

    // In-place translation leaves a single, translated document.
    let outputs: Vec<(&DocumentTree, String)> = match (&translated_tree, translated_name) {
        (Some(copy), Some(name)) => vec![(&tree, original_name), (copy, name)],
        (None, Some(name)) => vec![(&tree, name)],
        _ => vec![(&tree, original_name)],
    };
    let mut exports = Vec::with_capacity(outputs.len());
    for (doc, name) in outputs {
        let bytes = export::export(doc, options.format, &export_opts)?;
        exports.push(services.artifacts.put(&dir.join(name), &bytes).await?);
    }

    let wants_pictures =
        options.elements.pictures || config.image_mode == ImageMode::Referenced;
    let (mut images, mut tables) = (Vec::new(), Vec::new());
    for element in element_images(&tree, options.elements.tables, wants_pictures) {
        let stored = services
            .artifacts
            .put(&dir.join(&element.relative_path), &element.png)
            .await?;
        if element.relative_path.starts_with("tables") {
            tables.push(stored);
        } else {
            images.push(stored);
        }
    }
    debug!("Stored {} exports, {} images, {} tables", exports.len(), images.len(), tables.len());

    let text = export::to_text(translated_tree.as_ref().unwrap_or(&tree));
    let summary = summarize_or_fallback(services.summarizer.as_deref(), &text).await;

    tracker.complete().await.map_err(transition)?;
    tracker.message(format!("Finished {filename}")).await;
    info!("{} done in {}ms", filename, start.elapsed().as_millis());

    Ok(FileResult {
        filename,
        task_key: tracker.key().to_string(),
        text,
        summary,
        images,
        tables,
        exports,
        leaf_count,
        enrichment,
        translation,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Dispatch, convert off the runtime, and normalise.
async fn extract_tree(
    path: &Path,
    options: &FileOptions,
    config: &PipelineConfig,
    services: &Services,
    pool: &ConversionPool,
) -> Result<DocumentTree, DocflowError> {
    let mut dispatcher = FormatDispatcher::new(services.extractor.clone())
        .source_language(options.source_lang.as_deref())
        .images_scale(config.images_scale)
        .generate_images(options.wants_images(config.image_mode));
    if let Some(n) = options.max_pages {
        dispatcher = dispatcher.max_pages(n);
    }
    let handle = dispatcher.select(path)?;

    if tokio::fs::metadata(path).await.is_err() {
        return Err(DocflowError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut tree = pool.convert(handle).await?;
    let cleaned = normalize_tree(&mut tree);
    debug!("Normalised {} text items", cleaned);
    Ok(tree)
}

// ── Single-document API ──────────────────────────────────────────────────

/// Convert one file and enrich every picture and table when a vision
/// service is configured.
///
/// # Example
/// ```rust,no_run
/// use edgequake_docflow::{convert_document, OutputMode, PipelineConfig, PipelineOutput, Services};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::default();
/// let services = Services::local("out");
/// if let PipelineOutput::Text(md) = convert_document("notes.txt", &config, &services, OutputMode::Text).await? {
///     println!("{md}");
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert_document(
    path: impl AsRef<Path>,
    config: &PipelineConfig,
    services: &Services,
    mode: OutputMode,
) -> Result<PipelineOutput, DocflowError> {
    let path = path.as_ref();
    let options = FileOptions {
        elements: if services.vision.is_some() {
            EnrichOptions::all()
        } else {
            EnrichOptions::default()
        },
        ..FileOptions::default()
    };
    let pool = ConversionPool::new(1, config.raises_on_error);
    let mut tree = extract_tree(path, &options, config, services, &pool).await?;
    if let Some(vision) = services.vision.clone() {
        EnrichmentStage::from_config(vision, config)
            .enrich(&mut tree, &options.elements)
            .await?;
    }

    let export_opts = ExportOptions::new(config.image_mode);
    match mode {
        OutputMode::Tree => Ok(PipelineOutput::Tree(tree)),
        OutputMode::Text => Ok(PipelineOutput::Text(export::to_markdown(&tree, &export_opts))),
        OutputMode::File(out) => {
            let format = out
                .extension()
                .and_then(|e| e.to_str())
                .and_then(|e| e.parse::<ExportFormat>().ok())
                .unwrap_or(ExportFormat::Markdown);
            let bytes = export::export(&tree, format, &export_opts)?;
            write_atomic(&out, &bytes).await?;
            Ok(PipelineOutput::File(out))
        }
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn transition(e: TransitionError) -> DocflowError {
    DocflowError::Internal(e.to_string())
}

fn missing(service: &str) -> DocflowError {
    DocflowError::ServiceUnavailable {
        service: service.to_string(),
        detail: "not configured".to_string(),
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), DocflowError> {
    if cancel.is_cancelled() {
        Err(DocflowError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{NoopObserver, TaskStatus};
    use crate::services::task_store::InMemoryTaskStore;
    use std::sync::Arc;

    async fn tracker(store: Arc<InMemoryTaskStore>) -> ProgressTracker {
        ProgressTracker::create(store, Arc::new(NoopObserver), "guest", "docflow").await
    }

    #[tokio::test]
    async fn plain_text_file_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        std::fs::write(&input, "# Notes\n\nFirst line.\n\n- a\n- b\n").unwrap();
        let out = dir.path().join("out");

        let store = Arc::new(InMemoryTaskStore::new());
        let services = Services::local(&out).with_tasks(store.clone());
        let config = PipelineConfig::default();
        let pool = ConversionPool::new(1, true);
        let mut t = tracker(store.clone()).await;

        let result = process_file(
            &input,
            &FileOptions::default(),
            &config,
            &services,
            &pool,
            &mut t,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(t.status(), TaskStatus::Ready);
        assert_eq!(result.filename, "notes.txt");
        assert_eq!(result.exports, vec![out.join("auto/markdown/notes/notes.md")]);
        let md = std::fs::read_to_string(&result.exports[0]).unwrap();
        assert_eq!(md, "# Notes\n\nFirst line.\n\n- a\n- b\n");
        assert_eq!(result.summary, "");
        assert!(result.text.contains("First line."));
    }

    #[tokio::test]
    async fn unsupported_file_ends_in_error() {
        let store = Arc::new(InMemoryTaskStore::new());
        let services = Services::local("unused").with_tasks(store.clone());
        let mut t = tracker(store.clone()).await;
        let err = process_file(
            Path::new("archive.zip"),
            &FileOptions::default(),
            &PipelineConfig::default(),
            &services,
            &ConversionPool::new(1, true),
            &mut t,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "unsupported-format");
        assert_eq!(t.status(), TaskStatus::Error);
        let task = store.get(t.key()).unwrap();
        assert!(task.response_data.message.contains(".zip"));
    }

    #[tokio::test]
    async fn selecting_elements_without_vision_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.txt");
        std::fs::write(&input, "text").unwrap();
        let services = Services::local(dir.path());
        let mut t = tracker(Arc::new(InMemoryTaskStore::new())).await;
        let options = FileOptions {
            elements: EnrichOptions::all(),
            ..FileOptions::default()
        };
        let err = process_file(
            &input,
            &options,
            &PipelineConfig::default(),
            &services,
            &ConversionPool::new(1, true),
            &mut t,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "service-unavailable");
        assert!((t.fraction() - 0.33).abs() < 1e-6);
    }

    #[tokio::test]
    async fn convert_document_modes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("doc.md");
        std::fs::write(&input, "## Section\n\nBody").unwrap();
        let services = Services::local(dir.path());
        let config = PipelineConfig::default();

        match convert_document(&input, &config, &services, OutputMode::Text).await.unwrap() {
            PipelineOutput::Text(md) => assert_eq!(md, "## Section\n\nBody\n"),
            other => panic!("unexpected: {other:?}"),
        }
        match convert_document(&input, &config, &services, OutputMode::Tree).await.unwrap() {
            PipelineOutput::Tree(tree) => assert_eq!(tree.leaf_count(), 2),
            other => panic!("unexpected: {other:?}"),
        }
        let target = dir.path().join("nested/doc.json");
        let written = convert_document(&input, &config, &services, OutputMode::File(target.clone()))
            .await
            .unwrap();
        assert_eq!(written, PipelineOutput::File(target.clone()));
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&target).unwrap()).unwrap();
        assert_eq!(json["name"], "doc");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = convert_document(
            "does/not/exist.txt",
            &PipelineConfig::default(),
            &Services::local("unused"),
            OutputMode::Text,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "file-not-found");
    }
}
