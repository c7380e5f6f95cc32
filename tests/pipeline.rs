//! Session-level integration tests with in-process fakes for every service.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use edgequake_docflow::pipeline::encode::{to_png, EncodedImage};
use edgequake_docflow::pipeline::dispatch::ConverterOptions;
use edgequake_docflow::pipeline::extract::StructuralExtractor;
use edgequake_docflow::services::task_store::InMemoryTaskStore;
use edgequake_docflow::services::translator::{LanguagePair, TranslationError, TranslationService};
use edgequake_docflow::services::vision::{VisionError, VisionService};
use edgequake_docflow::{
    DocflowError, DocumentTree, EnrichOptions, ExportFormat, FailurePolicy, ImageRef,
    PictureNode, PipelineConfig, Services, Session, SessionEvent, SessionReport, SessionRequest,
    TableNode, TaskStatus, TextLabel, TextNode,
};
use futures::StreamExt;
use image::{DynamicImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

fn png_ref(w: u32, h: u32) -> ImageRef {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([20, 20, 20, 255])));
    ImageRef::png(to_png(&img).unwrap(), w, h)
}

/// Three "pages": a title, body text, one table and one picture, all with
/// rendered images.
struct ReportExtractor;

impl StructuralExtractor for ReportExtractor {
    fn convert(&self, path: &Path, _: &ConverterOptions) -> Result<DocumentTree, DocflowError> {
        let stem = path.file_stem().unwrap().to_string_lossy().into_owned();

        let mut table = TableNode::from_rows(vec![vec!["Год", "Выручка"], vec!["2023", "100"]]);
        table.image = Some(png_ref(40, 20));
        table.page = Some(2);

        let mut picture = PictureNode::new(Some(png_ref(30, 30)));
        picture.caption = Some("Схема".into());
        picture.page = Some(3);

        Ok(DocumentTree::new(stem)
            .with_node(TextNode::new(TextLabel::Title, "Годовой отчёт").into())
            .with_node(TextNode::paragraph("Первая страница.").into())
            .with_node(table.into())
            .with_node(TextNode::paragraph("Третья страница.").into())
            .with_node(picture.into()))
    }
}

struct FixedVision(&'static str);

#[async_trait]
impl VisionService for FixedVision {
    async fn extract_text(&self, _: &EncodedImage, _: &str) -> Result<String, VisionError> {
        Ok(self.0.to_string())
    }
}

struct DownVision;

#[async_trait]
impl VisionService for DownVision {
    async fn extract_text(&self, _: &EncodedImage, _: &str) -> Result<String, VisionError> {
        Err(VisionError::Unavailable("connection refused".into()))
    }
}

/// Prefixes every text with the target language; optionally slow.
#[derive(Default)]
struct TaggingTranslator {
    delay: Option<Duration>,
    calls: AtomicUsize,
}

#[async_trait]
impl TranslationService for TaggingTranslator {
    async fn translate(&self, text: &str, langs: &LanguagePair) -> Result<String, TranslationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        Ok(format!("[{}] {}", langs.target, text))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn touch(dir: &TempDir, name: &str) -> PathBuf {
    let p = dir.path().join(name);
    std::fs::write(&p, b"stub").unwrap();
    p
}

fn fractions(store: &InMemoryTaskStore, key: &str) -> Vec<f32> {
    store.progress_history(key).iter().map(|p| p.progress).collect()
}

async fn run(session: Session, request: SessionRequest) -> (Vec<SessionEvent>, SessionReport) {
    let (stream, handle) = session.run(request);
    let events: Vec<SessionEvent> = stream.collect().await;
    (events, handle.await.unwrap())
}

// ── Full pipeline ────────────────────────────────────────────────────────────

#[tokio::test]
async fn translated_report_with_tables_and_pictures() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let file = touch(&input, "report.pdf");

    let store = Arc::new(InMemoryTaskStore::new());
    let translator = Arc::new(TaggingTranslator::default());
    let services = Services::local(out.path())
        .with_extractor(Arc::new(ReportExtractor))
        .with_tasks(store.clone())
        .with_vision(Arc::new(FixedVision("распознанный текст")))
        .with_translator(translator.clone());

    let request = SessionRequest {
        source_lang: Some("ru".into()),
        target_lang: Some("en".into()),
        translated: true,
        elements: EnrichOptions::all(),
        ..SessionRequest::new(vec![file])
    };
    let (events, report) = run(Session::new(PipelineConfig::default(), services), request).await;

    assert!(report.is_success(), "{report:?}");
    let result = &report.files[0];

    // Task went through every checkpoint exactly once, in order.
    assert_eq!(store.keys(), vec![result.task_key.clone()]);
    assert!(result.task_key.starts_with("guest:"));
    assert_eq!(fractions(&store, &result.task_key), vec![0.1, 0.33, 0.66, 0.99, 1.0]);
    assert_eq!(store.get(&result.task_key).unwrap().progress.status, TaskStatus::Ready);

    // One table, one picture, both read.
    let enrichment = result.enrichment.as_ref().unwrap();
    assert_eq!((enrichment.tables, enrichment.pictures), (1, 1));
    assert_eq!(enrichment.enriched, 2);
    assert_eq!(result.tables.len(), 1);
    assert_eq!(result.images.len(), 1);
    assert!(result.tables[0].ends_with("ru/markdown/report/tables/table-1.png"));
    assert!(result.images[0].ends_with("ru/markdown/report/pictures/picture-1.png"));
    assert!(result.images[0].exists());

    // Every text leaf, enrichment text included, translated once.
    let translation = result.translation.as_ref().unwrap();
    assert_eq!(translation.translated, translation.units);
    assert_eq!(translator.calls.load(Ordering::SeqCst), translation.units);
    assert_eq!(result.exports.len(), 2);
    assert!(result.exports[1].ends_with("ru/markdown/report/report-translated-en.md"));

    let original = std::fs::read_to_string(&result.exports[0]).unwrap();
    let translated = std::fs::read_to_string(&result.exports[1]).unwrap();
    assert!(original.starts_with("# Годовой отчёт\n"));
    assert!(original.contains("распознанный текст"));
    assert!(translated.starts_with("# [en] Годовой отчёт\n"));
    assert!(translated.contains("| [en] Год | [en] Выручка |"));
    assert!(translated.contains("[en] распознанный текст"));
    assert!(result.text.contains("[en] Третья страница."));

    // Stream shape: info events, then file-ended, then all-files-ended.
    assert!(matches!(&events[0], SessionEvent::Info(i) if i.status == TaskStatus::Pending));
    let n = events.len();
    assert!(matches!(&events[n - 2], SessionEvent::FileEnded(f) if f == "report.pdf"));
    assert!(matches!(&events[n - 1], SessionEvent::AllFilesEnded(r) if r == &report));
    let messages: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Info(i) => i.message.as_deref(),
            _ => None,
        })
        .collect();
    assert!(messages.contains(&"Found 1 tables and 1 pictures"));
    assert_eq!(messages.last(), Some(&"Finished report.pdf"));
}

#[tokio::test]
async fn json_export_without_translation() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let file = touch(&input, "slides.pptx");

    let services = Services::local(out.path()).with_extractor(Arc::new(ReportExtractor));
    let request = SessionRequest {
        output_format: ExportFormat::Json,
        ..SessionRequest::new(vec![file])
    };
    let (_, report) = run(Session::new(PipelineConfig::default(), services), request).await;

    let result = &report.files[0];
    assert!(result.enrichment.is_none() && result.translation.is_none());
    assert_eq!(result.exports.len(), 1);
    assert!(result.exports[0].ends_with("auto/json/slides/slides.json"));
    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&result.exports[0]).unwrap()).unwrap();
    assert_eq!(json["name"], "slides");
    // No images stored when nothing asks for them.
    assert!(result.images.is_empty() && result.tables.is_empty());
}

// ── Failure policy ───────────────────────────────────────────────────────────

#[tokio::test]
async fn fail_fast_skips_remaining_files() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bad = touch(&input, "archive.zip");
    let good = touch(&input, "notes.txt");

    let (events, report) = run(
        Session::new(PipelineConfig::default(), Services::local(out.path())),
        SessionRequest::new(vec![bad, good]),
    )
    .await;

    assert!(report.files.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, "unsupported-format");
    assert_eq!(report.skipped, vec!["notes.txt"]);
    assert!(!report.cancelled);
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::Error(b) if b.filename.as_deref() == Some("archive.zip"))
    ));
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::FileEnded(_))));
}

#[tokio::test]
async fn continue_on_error_processes_every_file() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bad = touch(&input, "archive.zip");
    let good = touch(&input, "notes.txt");
    let missing = input.path().join("gone.txt");

    let config = PipelineConfig::builder()
        .failure_policy(FailurePolicy::ContinueOnError)
        .build()
        .unwrap();
    let (events, report) = run(
        Session::new(config, Services::local(out.path())),
        SessionRequest::new(vec![bad, good, missing]),
    )
    .await;

    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].filename, "notes.txt");
    let kinds: Vec<&str> = report.failures.iter().map(|f| f.kind.as_str()).collect();
    assert_eq!(kinds, vec!["unsupported-format", "file-not-found"]);
    assert!(report.skipped.is_empty());
    let ended: Vec<&SessionEvent> = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::FileEnded(_)))
        .collect();
    assert_eq!(ended.len(), 1);
}

#[tokio::test]
async fn vision_outage_fails_the_file() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let file = touch(&input, "report.pdf");

    let store = Arc::new(InMemoryTaskStore::new());
    let services = Services::local(out.path())
        .with_extractor(Arc::new(ReportExtractor))
        .with_tasks(store.clone())
        .with_vision(Arc::new(DownVision));
    let request = SessionRequest {
        elements: EnrichOptions { tables: true, pictures: false },
        ..SessionRequest::new(vec![file])
    };
    let (_, report) = run(Session::new(PipelineConfig::default(), services), request).await;

    assert_eq!(report.failures[0].kind, "service-unavailable");
    let key = &store.keys()[0];
    let task = store.get(key).unwrap();
    assert_eq!(task.progress.status, TaskStatus::Error);
    // Conversion had finished; the failure keeps that progress.
    assert_eq!(task.progress.progress, 0.33);
    assert!(!task.response_data.message.is_empty());
    // Nothing was exported.
    assert!(!out.path().join("auto").exists());
}

// ── Disconnect ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn dropping_the_stream_cancels_the_session() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let files = vec![
        touch(&input, "a.pdf"),
        touch(&input, "b.pdf"),
        touch(&input, "c.pdf"),
    ];

    let translator = Arc::new(TaggingTranslator {
        delay: Some(Duration::from_millis(200)),
        ..Default::default()
    });
    let services = Services::local(out.path())
        .with_extractor(Arc::new(ReportExtractor))
        .with_translator(translator);
    let request = SessionRequest {
        target_lang: Some("en".into()),
        translated: true,
        ..SessionRequest::new(files)
    };

    let (mut stream, handle) = Session::new(PipelineConfig::default(), services).run(request);
    assert!(stream.next().await.is_some());
    drop(stream);

    let report = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("session should stop after disconnect")
        .unwrap();
    assert!(report.cancelled);
    assert!(report.files.len() < 3);
    assert!(!report.skipped.is_empty());
}
