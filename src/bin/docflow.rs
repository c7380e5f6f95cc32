//! CLI binary for edgequake-docflow.
//!
//! A thin shim over the library crate: flags become a `PipelineConfig`,
//! `ServiceEndpoints` and a `SessionRequest`; session events become a
//! progress bar, or JSON lines on stdout with `--json`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_docflow::pipeline::extract::{BuiltinExtractor, CommandExtractor};
use edgequake_docflow::{
    EnrichOptions, ExportFormat, FailurePolicy, ImageMode, PipelineConfig, RetryPolicy,
    ServiceEndpoints, Services, Session, SessionEvent, SessionReport, SessionRequest,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a text file to markdown under ./docflow-out
  docflow notes.txt

  # Read tables and pictures with a local OpenAI-compatible vision server
  docflow --vision-url http://localhost:8000 --tables --pictures report.pdf

  # Translate Russian to English, keep going when a file fails
  docflow --source-lang ru --target-lang en --translator-url http://localhost:9000/translate \
          --continue-on-error a.docx b.pptx

  # Stream session events as JSON lines
  docflow --json --format yaml scan.png

ENVIRONMENT VARIABLES:
  DOCFLOW_VISION_URL       OpenAI-compatible vision endpoint
  DOCFLOW_VISION_MODEL     Vision model name
  DOCFLOW_VISION_API_KEY   Bearer token for the vision endpoint
  DOCFLOW_TRANSLATOR_URL   Translation service URL
  DOCFLOW_TASK_STORE_URL   Task-Store base URL
  DOCFLOW_SUMMARIZER_URL   Summarization service URL
  DOCFLOW_EXTRACTOR        External converter command for office/PDF files

  Without DOCFLOW_VISION_URL, a vision provider is auto-detected from
  OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY.
"#;

/// Enrich, translate and export documents.
#[derive(Parser, Debug)]
#[command(
    name = "docflow",
    version,
    about = "Enrich, translate and export documents using vision and translation services",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files to process, in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Directory receiving exports and element images.
    #[arg(short, long, env = "DOCFLOW_OUTPUT_DIR", default_value = "docflow-out")]
    output_dir: PathBuf,

    /// Output format.
    #[arg(short, long, env = "DOCFLOW_FORMAT", value_enum, default_value = "markdown")]
    format: FormatArg,

    /// Source language code (drives OCR hints).
    #[arg(long, env = "DOCFLOW_SOURCE_LANG")]
    source_lang: Option<String>,

    /// Translate into this language code.
    #[arg(long, env = "DOCFLOW_TARGET_LANG")]
    target_lang: Option<String>,

    /// Convert at most this many pages per file.
    #[arg(long, env = "DOCFLOW_MAX_PAGES")]
    max_pages: Option<u32>,

    /// Read the text inside tables.
    #[arg(long)]
    tables: bool,

    /// Read the text inside pictures.
    #[arg(long)]
    pictures: bool,

    /// How pictures appear in exports.
    #[arg(long, env = "DOCFLOW_IMAGE_MODE", value_enum, default_value = "placeholder")]
    image_mode: ImageModeArg,

    /// Task owner.
    #[arg(long, env = "DOCFLOW_USER_ID", default_value = "guest")]
    user_id: String,

    /// Report a failed file and continue with the next one.
    #[arg(long, env = "DOCFLOW_CONTINUE_ON_ERROR")]
    continue_on_error: bool,

    /// Translation calls in flight per file.
    #[arg(short, long, env = "DOCFLOW_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Attempts per translation call (timeouts only are retried).
    #[arg(long, env = "DOCFLOW_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Vision call timeout in seconds.
    #[arg(long, env = "DOCFLOW_VISION_TIMEOUT", default_value_t = 25)]
    vision_timeout: u64,

    /// Translation call timeout in seconds.
    #[arg(long, env = "DOCFLOW_TRANSLATION_TIMEOUT", default_value_t = 60)]
    translation_timeout: u64,

    /// Parallel structural conversions.
    #[arg(long, env = "DOCFLOW_WORKERS", default_value_t = 2)]
    workers: usize,

    /// External converter command for PDF and office files.
    #[arg(long, env = "DOCFLOW_EXTRACTOR")]
    extractor: Option<PathBuf>,

    #[arg(long, env = "DOCFLOW_VISION_URL")]
    vision_url: Option<String>,

    #[arg(long, env = "DOCFLOW_VISION_MODEL")]
    vision_model: Option<String>,

    #[arg(long, env = "DOCFLOW_VISION_API_KEY", hide_env_values = true)]
    vision_api_key: Option<String>,

    #[arg(long, env = "DOCFLOW_TRANSLATOR_URL")]
    translator_url: Option<String>,

    #[arg(long, env = "DOCFLOW_TASK_STORE_URL")]
    task_store_url: Option<String>,

    #[arg(long, env = "DOCFLOW_SUMMARIZER_URL")]
    summarizer_url: Option<String>,

    /// Print session events as JSON lines on stdout.
    #[arg(long)]
    json: bool,

    /// -v for INFO logs, -vv for DEBUG.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Markdown,
    Json,
    Yaml,
    Text,
}

impl From<FormatArg> for ExportFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => ExportFormat::Markdown,
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Yaml => ExportFormat::Yaml,
            FormatArg::Text => ExportFormat::Text,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ImageModeArg {
    Embedded,
    Placeholder,
    Referenced,
}

impl From<ImageModeArg> for ImageMode {
    fn from(v: ImageModeArg) -> Self {
        match v {
            ImageModeArg::Embedded => ImageMode::Embedded,
            ImageModeArg::Placeholder => ImageMode::Placeholder,
            ImageModeArg::Referenced => ImageMode::Referenced,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build session ────────────────────────────────────────────────────
    let config = build_config(&cli)?;
    let endpoints = ServiceEndpoints {
        vision_url: cli.vision_url.clone(),
        vision_model: cli.vision_model.clone(),
        vision_api_key: cli.vision_api_key.clone(),
        translator_url: cli.translator_url.clone(),
        task_store_url: cli.task_store_url.clone(),
        summarizer_url: cli.summarizer_url.clone(),
    };
    let mut services = Services::from_endpoints(&endpoints, &config, &cli.output_dir)
        .context("Failed to set up service clients")?;
    if let Some(ref program) = cli.extractor {
        services = services.with_extractor(Arc::new(BuiltinExtractor::with_command(
            CommandExtractor::new(program),
        )));
    }

    let request = SessionRequest {
        files: cli.files.clone(),
        source_lang: cli.source_lang.clone(),
        target_lang: cli.target_lang.clone(),
        translated: cli.target_lang.is_some(),
        max_pages: cli.max_pages,
        output_format: cli.format.into(),
        elements: EnrichOptions {
            tables: cli.tables,
            pictures: cli.pictures,
        },
        user_id: cli.user_id.clone(),
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let (mut events, handle) = Session::new(config, services).run(request);
    let bar = (!cli.quiet && !cli.json).then(|| progress_bar(cli.files.len()));
    let mut file_progress: HashMap<String, f32> = HashMap::new();
    let stdout = io::stdout();

    while let Some(event) = events.next().await {
        if cli.json {
            let line = serde_json::to_string(&event).context("Failed to serialise event")?;
            writeln!(stdout.lock(), "{line}").context("Failed to write to stdout")?;
            continue;
        }
        let Some(bar) = &bar else { continue };
        match &event {
            SessionEvent::Info(info) => {
                file_progress.insert(info.filename.clone(), info.progress);
                let done: f32 = file_progress.values().sum();
                bar.set_position((done * 100.0) as u64);
                if let Some(msg) = &info.message {
                    bar.set_message(format!("{}: {}", info.filename, msg));
                }
            }
            SessionEvent::FileEnded(name) => bar.println(format!("  {} {}", green("✓"), name)),
            SessionEvent::Error(err) => bar.println(format!(
                "  {} {}  {}",
                red("✗"),
                err.filename.as_deref().unwrap_or("request"),
                red(&err.message)
            )),
            SessionEvent::AllFilesEnded(_) => bar.finish_and_clear(),
        }
    }

    let report = handle.await.context("Session task failed")?;
    if !cli.quiet && !cli.json {
        print_summary(&report);
    }
    if !report.failures.is_empty() {
        bail!("{} of {} files failed", report.failures.len(), cli.files.len());
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    PipelineConfig::builder()
        .translation_concurrency(cli.concurrency)
        .translation_retry(RetryPolicy::new(cli.max_attempts, 250))
        .vision_timeout_secs(cli.vision_timeout)
        .translation_call_timeout_secs(cli.translation_timeout)
        .conversion_workers(cli.workers)
        .image_mode(cli.image_mode.into())
        .failure_policy(if cli.continue_on_error {
            FailurePolicy::ContinueOnError
        } else {
            FailurePolicy::FailFast
        })
        .build()
        .context("Invalid configuration")
}

fn progress_bar(files: usize) -> ProgressBar {
    let bar = ProgressBar::new(files as u64 * 100);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {percent:>3}%  {wide_msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ");
    bar.set_style(style);
    bar.set_prefix("Processing");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn print_summary(report: &SessionReport) {
    for file in &report.files {
        eprintln!("{} {}", green("✔"), bold(&file.filename));
        for path in file.exports.iter().chain(&file.tables).chain(&file.images) {
            eprintln!("   {}", dim(&path.display().to_string()));
        }
        if !file.summary.is_empty() {
            eprintln!("   {}", dim(&file.summary));
        }
    }
    for failure in &report.failures {
        eprintln!("{} {}  {}", red("✘"), bold(&failure.filename), failure.message);
    }
    if !report.skipped.is_empty() {
        eprintln!("{} skipped: {}", red("⚠"), report.skipped.join(", "));
    }
    eprintln!("{}", dim(&format!("{}ms total", report.duration_ms)));
}
