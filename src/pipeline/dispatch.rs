//! Format dispatch: map a file to its format group and a pre-configured
//! converter.
//!
//! Groups are fixed and non-overlapping; the extension decides,
//! case-insensitively. Each call to [`FormatDispatcher::select`] builds a
//! fresh [`ConverterHandle`], so concurrent files never share converter
//! state.

use crate::document::DocumentTree;
use crate::error::DocflowError;
use crate::pipeline::extract::StructuralExtractor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatGroup {
    Image,
    Pdf,
    Word,
    PowerPoint,
    Spreadsheet,
    Html,
    PlainText,
}

impl FormatGroup {
    pub const ALL: [FormatGroup; 7] = [
        FormatGroup::Image,
        FormatGroup::Pdf,
        FormatGroup::Word,
        FormatGroup::PowerPoint,
        FormatGroup::Spreadsheet,
        FormatGroup::Html,
        FormatGroup::PlainText,
    ];

    /// Lower-case extensions, without the dot.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FormatGroup::Image => &["jpg", "jpeg", "png", "tiff", "tif", "bmp", "webp"],
            FormatGroup::Pdf => &["pdf"],
            FormatGroup::Word => &["docx", "doc"],
            FormatGroup::PowerPoint => &["pptx", "ppt"],
            FormatGroup::Spreadsheet => &["xlsx", "xls", "csv"],
            FormatGroup::Html => &["html", "htm"],
            FormatGroup::PlainText => &["txt", "md"],
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|g| g.extensions().contains(&ext.as_str()))
    }

    /// Scanned formats need OCR; everything else carries a text layer.
    fn needs_ocr(self) -> bool {
        matches!(self, FormatGroup::Pdf | FormatGroup::Image)
    }

    fn has_images(self) -> bool {
        !matches!(self, FormatGroup::Html | FormatGroup::PlainText)
    }
}

impl fmt::Display for FormatGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FormatGroup::Image => "image",
            FormatGroup::Pdf => "pdf",
            FormatGroup::Word => "word",
            FormatGroup::PowerPoint => "powerpoint",
            FormatGroup::Spreadsheet => "spreadsheet",
            FormatGroup::Html => "html",
            FormatGroup::PlainText => "plain-text",
        };
        f.write_str(s)
    }
}

/// OCR language hints for a source language.
///
/// Cyrillic and Arabic sources pull in their script siblings; every list
/// ends with English. No source language means the Cyrillic set.
pub fn ocr_languages(source: Option<&str>) -> Vec<String> {
    let list: Vec<&str> = match source.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("ru") => vec!["ru", "rs_cyrillic", "be", "bg", "uk", "mn", "en"],
        Some("ar") => vec!["ar", "fa", "ur", "ug", "en"],
        Some("en") => vec!["en"],
        Some(other) => return vec![other.to_string(), "en".to_string()],
    };
    list.into_iter().map(String::from).collect()
}

/// Everything a structural extractor is told about one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterOptions {
    pub group: FormatGroup,
    /// 1-based, inclusive.
    pub page_range: (u32, u32),
    pub ocr: bool,
    pub ocr_languages: Vec<String>,
    pub images_scale: f32,
    pub generate_images: bool,
}

/// A converter bound to one file. Cheap to build; not reused across files.
#[derive(Clone)]
pub struct ConverterHandle {
    pub path: PathBuf,
    pub options: ConverterOptions,
    extractor: Arc<dyn StructuralExtractor>,
}

impl fmt::Debug for ConverterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterHandle")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ConverterHandle {
    /// Run the extractor. Blocking; call from a worker thread.
    pub fn convert(&self) -> Result<DocumentTree, DocflowError> {
        self.extractor.convert(&self.path, &self.options)
    }
}

/// Builds [`ConverterHandle`]s.
#[derive(Clone)]
pub struct FormatDispatcher {
    extractor: Arc<dyn StructuralExtractor>,
    max_pages: u32,
    source_language: Option<String>,
    images_scale: f32,
    generate_images: bool,
}

impl FormatDispatcher {
    pub fn new(extractor: Arc<dyn StructuralExtractor>) -> Self {
        Self {
            extractor,
            max_pages: u32::MAX,
            source_language: None,
            images_scale: 2.0,
            generate_images: true,
        }
    }

    pub fn max_pages(mut self, n: u32) -> Self {
        self.max_pages = n.max(1);
        self
    }

    pub fn source_language(mut self, lang: Option<&str>) -> Self {
        self.source_language = lang.map(String::from);
        self
    }

    pub fn images_scale(mut self, scale: f32) -> Self {
        self.images_scale = scale;
        self
    }

    /// Whether rasters of pictures and tables are wanted at all.
    pub fn generate_images(mut self, yes: bool) -> Self {
        self.generate_images = yes;
        self
    }

    pub fn group_of(path: &Path) -> Result<FormatGroup, DocflowError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        FormatGroup::from_extension(ext).ok_or_else(|| DocflowError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: format!(".{}", ext.to_ascii_lowercase()),
        })
    }

    /// Pick the group for `path` and bind a converter to it.
    pub fn select(&self, path: &Path) -> Result<ConverterHandle, DocflowError> {
        let group = Self::group_of(path)?;
        let ocr = group.needs_ocr();
        let options = ConverterOptions {
            group,
            page_range: (1, self.max_pages),
            ocr,
            ocr_languages: if ocr {
                ocr_languages(self.source_language.as_deref())
            } else {
                Vec::new()
            },
            images_scale: self.images_scale,
            generate_images: self.generate_images && group.has_images(),
        };
        Ok(ConverterHandle {
            path: path.to_path_buf(),
            options,
            extractor: Arc::clone(&self.extractor),
        })
    }
}
