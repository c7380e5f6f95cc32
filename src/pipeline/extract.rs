//! Structural extraction: raw file → [`DocumentTree`].
//!
//! Extractors are synchronous and CPU-bound. They only ever run inside
//! [`ConversionPool`], which moves them onto the blocking thread pool and
//! bounds how many run at once, so a slow PDF never stalls the async
//! services (vision, translation, task store) of the same session.

use crate::document::{DocumentTree, ImageRef, PictureNode, TextLabel, TextNode};
use crate::error::DocflowError;
use crate::pipeline::dispatch::{ConverterHandle, ConverterOptions, FormatGroup};
use crate::pipeline::encode::to_png;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Converts one file into a document tree.
pub trait StructuralExtractor: Send + Sync {
    fn convert(&self, path: &Path, options: &ConverterOptions) -> Result<DocumentTree, DocflowError>;
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

fn conversion_error(path: &Path, detail: impl Into<String>) -> DocflowError {
    DocflowError::ConversionError {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

fn read(path: &Path) -> Result<Vec<u8>, DocflowError> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DocflowError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => conversion_error(path, e.to_string()),
    })
}

// ── Plain text ───────────────────────────────────────────────────────────

/// `.txt` and `.md`: one node per blank-line separated block.
///
/// Markdown headings (`#`) and list items (`-`, `*`) keep their role; all
/// other blocks become paragraphs.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl StructuralExtractor for PlainTextExtractor {
    fn convert(&self, path: &Path, _options: &ConverterOptions) -> Result<DocumentTree, DocflowError> {
        let bytes = read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(parse_blocks(&stem(path), &text))
    }
}

fn parse_blocks(name: &str, text: &str) -> DocumentTree {
    let mut tree = DocumentTree::new(name);
    let normalised = text.replace("\r\n", "\n");
    for block in normalised.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let hashes = block.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&hashes) && block[hashes..].starts_with(' ') && !block.contains('\n') {
            let title = block[hashes..].trim();
            let node = if hashes == 1 {
                TextNode::new(TextLabel::Title, title)
            } else {
                TextNode::heading((hashes - 1) as u8, title)
            };
            tree.nodes.push(node.into());
        } else if block.lines().all(|l| l.starts_with("- ") || l.starts_with("* ")) {
            for line in block.lines() {
                tree.nodes
                    .push(TextNode::new(TextLabel::ListItem, line[2..].trim()).into());
            }
        } else {
            tree.nodes.push(TextNode::paragraph(block).into());
        }
    }
    tree
}

// ── Image files ──────────────────────────────────────────────────────────

/// A standalone image becomes a single picture node holding it as PNG.
///
/// Reading its text is the enrichment stage's job, not the extractor's.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileExtractor;

impl StructuralExtractor for ImageFileExtractor {
    fn convert(&self, path: &Path, options: &ConverterOptions) -> Result<DocumentTree, DocflowError> {
        let bytes = read(path)?;
        let img = image::load_from_memory(&bytes).map_err(|e| conversion_error(path, e.to_string()))?;
        let picture = if options.generate_images {
            let png = to_png(&img).map_err(|e| conversion_error(path, e.to_string()))?;
            PictureNode::new(Some(ImageRef::png(png, img.width(), img.height())))
        } else {
            PictureNode::new(None)
        };
        Ok(DocumentTree::new(stem(path)).with_node(
            PictureNode {
                page: Some(1),
                ..picture
            }
            .into(),
        ))
    }
}

// ── External converter command ───────────────────────────────────────────

/// Runs an external converter that prints a JSON [`DocumentTree`] on stdout:
///
/// ```text
/// <program> <path> --from-page 1 --to-page N --images-scale S
///           [--ocr-lang ru,en | --no-ocr] [--no-images]
/// ```
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
}

impl CommandExtractor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(path: &Path, options: &ConverterOptions) -> Vec<String> {
        let mut args = vec![
            path.to_string_lossy().into_owned(),
            "--from-page".into(),
            options.page_range.0.to_string(),
            "--to-page".into(),
            options.page_range.1.to_string(),
            "--images-scale".into(),
            options.images_scale.to_string(),
        ];
        if options.ocr {
            args.push("--ocr-lang".into());
            args.push(options.ocr_languages.join(","));
        } else {
            args.push("--no-ocr".into());
        }
        if !options.generate_images {
            args.push("--no-images".into());
        }
        args
    }
}

impl StructuralExtractor for CommandExtractor {
    fn convert(&self, path: &Path, options: &ConverterOptions) -> Result<DocumentTree, DocflowError> {
        if !path.exists() {
            return Err(DocflowError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let args = Self::args(path, options);
        debug!("Running {} {:?}", self.program.display(), args);
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| conversion_error(path, format!("cannot run {}: {e}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(conversion_error(
                path,
                format!("converter exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let mut tree: DocumentTree = serde_json::from_slice(&output.stdout)
            .map_err(|e| conversion_error(path, format!("invalid converter output: {e}")))?;
        if tree.name.is_empty() {
            tree.name = stem(path);
        }
        Ok(tree)
    }
}

// ── Routing ──────────────────────────────────────────────────────────────

/// Default extractor: plain text and images in-process, everything else
/// through an optional [`CommandExtractor`].
#[derive(Debug, Default, Clone)]
pub struct BuiltinExtractor {
    command: Option<CommandExtractor>,
}

impl BuiltinExtractor {
    pub fn with_command(command: CommandExtractor) -> Self {
        Self {
            command: Some(command),
        }
    }
}

impl StructuralExtractor for BuiltinExtractor {
    fn convert(&self, path: &Path, options: &ConverterOptions) -> Result<DocumentTree, DocflowError> {
        match (options.group, &self.command) {
            (FormatGroup::PlainText, _) => PlainTextExtractor.convert(path, options),
            (_, Some(cmd)) => cmd.convert(path, options),
            (FormatGroup::Image, None) => ImageFileExtractor.convert(path, options),
            (group, None) => Err(conversion_error(
                path,
                format!("no converter configured for {group} files"),
            )),
        }
    }
}

// ── Worker pool ──────────────────────────────────────────────────────────

/// Bounded pool for blocking conversions, owned by one session.
#[derive(Debug, Clone)]
pub struct ConversionPool {
    permits: Arc<Semaphore>,
    raises_on_error: bool,
}

impl ConversionPool {
    pub fn new(workers: usize, raises_on_error: bool) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            raises_on_error,
        }
    }

    /// Convert on a blocking worker.
    ///
    /// With `raises_on_error = false` a conversion failure is logged and an
    /// empty tree returned instead. Unsupported or missing files still fail.
    pub async fn convert(&self, handle: ConverterHandle) -> Result<DocumentTree, DocflowError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| DocflowError::Internal("conversion pool closed".into()))?;
        let path = handle.path.clone();
        let started = std::time::Instant::now();

        let result = tokio::task::spawn_blocking(move || handle.convert())
            .await
            .map_err(|e| DocflowError::Internal(format!("Conversion task panicked: {e}")))?;

        match result {
            Ok(tree) => {
                info!(
                    "Converted {} → {} nodes in {}ms",
                    path.display(),
                    tree.nodes.len(),
                    started.elapsed().as_millis()
                );
                Ok(tree)
            }
            Err(DocflowError::ConversionError { detail, .. }) if !self.raises_on_error => {
                warn!("Conversion of {} failed, continuing with an empty tree: {}", path.display(), detail);
                Ok(DocumentTree::new(stem(&path)))
            }
            Err(e) => Err(e),
        }
    }
}
