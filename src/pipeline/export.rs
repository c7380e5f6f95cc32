//! Export: render a tree as markdown, JSON, YAML or plain text.
//!
//! Every exporter is a pure function of the tree and [`ExportOptions`]: no
//! I/O, no mutation, and the same input always yields the same bytes.
//!
//! ## Pictures
//!
//! | [`ImageMode`] | markdown | JSON / YAML |
//! |---------------|----------|-------------|
//! | `Embedded` | `![Image](data:image/png;base64,…)` | `image.uri` is the data URI |
//! | `Placeholder` | `<!-- image -->` | no `uri` |
//! | `Referenced` | `![Image](pictures/picture-N.png)` | `image.uri` is the relative path |
//!
//! `N` is the 1-based position of the picture in walk order, the same
//! numbering [`element_images`] uses for the files it produces.

use crate::document::{Cell, DocumentTree, ImageRef, Node, TableNode, TextLabel, TextNode};
use crate::error::DocflowError;
use crate::pipeline::encode::to_png;
use crate::walker::walk;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

const IMAGE_PLACEHOLDER: &str = "<!-- image -->";

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Json,
    Yaml,
    Text,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
            ExportFormat::Yaml => "yaml",
            ExportFormat::Text => "txt",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportFormat::Markdown => "markdown",
            ExportFormat::Json => "json",
            ExportFormat::Yaml => "yaml",
            ExportFormat::Text => "text",
        };
        f.write_str(s)
    }
}

impl FromStr for ExportFormat {
    type Err = DocflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            "text" | "txt" => Ok(ExportFormat::Text),
            other => Err(DocflowError::InvalidRequest(format!(
                "unknown output format '{other}' (expected markdown, json, yaml or text)"
            ))),
        }
    }
}

/// How pictures appear in markdown and structural exports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    Embedded,
    #[default]
    Placeholder,
    Referenced,
}

impl FromStr for ImageMode {
    type Err = DocflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedded" => Ok(ImageMode::Embedded),
            "placeholder" => Ok(ImageMode::Placeholder),
            "referenced" => Ok(ImageMode::Referenced),
            other => Err(DocflowError::InvalidRequest(format!("unknown image mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub image_mode: ImageMode,
}

impl ExportOptions {
    pub fn new(image_mode: ImageMode) -> Self {
        Self { image_mode }
    }
}

/// Render `tree` in `format`.
pub fn export(
    tree: &DocumentTree,
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<Vec<u8>, DocflowError> {
    let failed = |detail: String| DocflowError::ExportFailed {
        format: format.to_string(),
        detail,
    };
    match format {
        ExportFormat::Markdown => Ok(to_markdown(tree, options).into_bytes()),
        ExportFormat::Text => Ok(to_text(tree).into_bytes()),
        ExportFormat::Json => {
            let doc = ExportedDocument::from_tree(tree, options);
            let mut bytes = serde_json::to_vec_pretty(&doc).map_err(|e| failed(e.to_string()))?;
            bytes.push(b'\n');
            Ok(bytes)
        }
        ExportFormat::Yaml => {
            let doc = ExportedDocument::from_tree(tree, options);
            serde_yaml::to_string(&doc)
                .map(String::into_bytes)
                .map_err(|e| failed(e.to_string()))
        }
    }
}

// ── Markdown ─────────────────────────────────────────────────────────────────

pub fn to_markdown(tree: &DocumentTree, options: &ExportOptions) -> String {
    let mut blocks: Vec<(bool, String)> = Vec::new();
    let mut picture_no = 0usize;

    for item in walk(tree) {
        let block = match item.node {
            Node::Text(t) => text_block(t).map(|b| (t.label == TextLabel::ListItem, b)),
            Node::Picture(p) => {
                picture_no += 1;
                let mut b = picture_markdown(p.image.as_ref(), picture_no, options.image_mode);
                if let Some(caption) = p.caption.as_deref().filter(|c| !c.trim().is_empty()) {
                    b.push_str("\n\n");
                    b.push_str(caption.trim());
                }
                Some((false, b))
            }
            Node::Table(t) => table_markdown(t).map(|mut b| {
                if let Some(caption) = t.caption.as_deref().filter(|c| !c.trim().is_empty()) {
                    b.push_str("\n\n");
                    b.push_str(caption.trim());
                }
                (false, b)
            }),
        };
        if let Some(b) = block {
            blocks.push(b);
        }
    }

    let mut out = String::new();
    let mut prev_list = false;
    for (i, (is_list, block)) in blocks.iter().enumerate() {
        if i > 0 {
            // consecutive list items form one list
            out.push_str(if prev_list && *is_list { "\n" } else { "\n\n" });
        }
        out.push_str(block);
        prev_list = *is_list;
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn text_block(node: &TextNode) -> Option<String> {
    let text = node.text().trim();
    if text.is_empty() {
        return None;
    }
    Some(match node.label {
        TextLabel::Title => format!("# {text}"),
        TextLabel::SectionHeader => {
            let depth = (node.level as usize + 1).min(6);
            format!("{} {text}", "#".repeat(depth))
        }
        TextLabel::ListItem => {
            let indent = "  ".repeat((node.level as usize).saturating_sub(1));
            format!("{indent}- {text}")
        }
        TextLabel::Code => format!("```\n{text}\n```"),
        TextLabel::Formula => format!("$${text}$$"),
        TextLabel::Paragraph
        | TextLabel::Caption
        | TextLabel::Footnote
        | TextLabel::Enrichment => text.to_string(),
    })
}

fn picture_markdown(image: Option<&ImageRef>, n: usize, mode: ImageMode) -> String {
    match (mode, image) {
        (ImageMode::Embedded, Some(img)) => format!("![Image]({})", data_uri(img)),
        (ImageMode::Referenced, Some(_)) => format!("![Image]({})", picture_path(n)),
        _ => IMAGE_PLACEHOLDER.to_string(),
    }
}

fn table_markdown(table: &TableNode) -> Option<String> {
    let grid = table.grid();
    let (header, body) = grid.split_first()?;
    if table.num_cols == 0 {
        return None;
    }
    let row = |cells: &[&str]| {
        let cells: Vec<String> = cells.iter().map(|c| escape_cell(c)).collect();
        format!("| {} |", cells.join(" | "))
    };
    let mut lines = vec![row(header)];
    lines.push(format!("|{}", " --- |".repeat(table.num_cols)));
    lines.extend(body.iter().map(|r| row(r)));
    Some(lines.join("\n"))
}

fn escape_cell(text: &str) -> String {
    text.trim().replace('|', "\\|").replace('\n', " ")
}

fn data_uri(img: &ImageRef) -> String {
    format!("data:{};base64,{}", img.mime, STANDARD.encode(&img.data))
}

fn picture_path(n: usize) -> String {
    format!("pictures/picture-{n}.png")
}

fn table_path(n: usize) -> String {
    format!("tables/table-{n}.png")
}

// ── Plain text ───────────────────────────────────────────────────────────────

/// Text content only: pictures vanish, their enrichment text stays.
pub fn to_text(tree: &DocumentTree) -> String {
    let mut blocks: Vec<String> = Vec::new();
    for item in walk(tree) {
        match item.node {
            Node::Text(t) if !t.text().trim().is_empty() => blocks.push(t.text().trim().to_string()),
            Node::Table(t) if t.num_rows > 0 => {
                let rows: Vec<String> = t
                    .grid()
                    .iter()
                    .map(|r| r.iter().map(|c| c.trim()).collect::<Vec<_>>().join("\t"))
                    .collect();
                blocks.push(rows.join("\n"));
            }
            _ => {}
        }
    }
    let mut out = blocks.join("\n\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

// ── Structural dump ──────────────────────────────────────────────────────────

/// Serialisable view of a tree for JSON/YAML: every semantic field, no
/// binary payload unless the image mode asks for one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedDocument {
    pub name: String,
    pub nodes: Vec<ExportedNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportedNode {
    Text {
        label: TextLabel,
        level: u8,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_text: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        children: Vec<ExportedNode>,
    },
    Picture {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<ExportedImage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page: Option<u32>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        children: Vec<ExportedNode>,
    },
    Table {
        num_rows: usize,
        num_cols: usize,
        cells: Vec<ExportedCell>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page: Option<u32>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        children: Vec<ExportedNode>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedImage {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedCell {
    pub row: usize,
    pub col: usize,
    pub column_header: bool,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
}

impl ExportedDocument {
    pub fn from_tree(tree: &DocumentTree, options: &ExportOptions) -> Self {
        let mut picture_no = 0usize;
        Self {
            name: tree.name.clone(),
            nodes: tree
                .nodes
                .iter()
                .map(|n| exported_node(n, options.image_mode, &mut picture_no))
                .collect(),
        }
    }

    /// Current text of every leaf in the same order as
    /// [`DocumentTree::leaf_texts`].
    pub fn leaf_texts(&self) -> Vec<String> {
        fn visit(node: &ExportedNode, out: &mut Vec<String>) {
            let children = match node {
                ExportedNode::Text { text, children, .. } => {
                    out.push(text.clone());
                    children
                }
                ExportedNode::Picture { children, .. } => children,
                ExportedNode::Table {
                    cells, children, ..
                } => {
                    out.extend(cells.iter().map(|c| c.text.clone()));
                    children
                }
            };
            for child in children {
                visit(child, out);
            }
        }
        let mut out = Vec::new();
        for node in &self.nodes {
            visit(node, &mut out);
        }
        out
    }
}

// Recursion here matches walk order: a node is numbered before its children.
fn exported_node(node: &Node, mode: ImageMode, picture_no: &mut usize) -> ExportedNode {
    let children = |nodes: &[Node], picture_no: &mut usize| -> Vec<ExportedNode> {
        nodes
            .iter()
            .map(|n| exported_node(n, mode, picture_no))
            .collect()
    };
    match node {
        Node::Text(t) => ExportedNode::Text {
            label: t.label,
            level: t.level,
            text: t.text().to_string(),
            original_text: t.original_text().map(String::from),
            children: children(&t.children, picture_no),
        },
        Node::Picture(p) => {
            *picture_no += 1;
            let n = *picture_no;
            let image = p.image.as_ref().map(|img| ExportedImage {
                mime: img.mime.clone(),
                width: img.width,
                height: img.height,
                uri: match mode {
                    ImageMode::Embedded => Some(data_uri(img)),
                    ImageMode::Referenced => Some(picture_path(n)),
                    ImageMode::Placeholder => None,
                },
            });
            ExportedNode::Picture {
                image,
                caption: p.caption.clone(),
                page: p.page,
                children: children(&p.children, picture_no),
            }
        }
        Node::Table(t) => ExportedNode::Table {
            num_rows: t.num_rows,
            num_cols: t.num_cols,
            cells: t.cells.iter().map(exported_cell).collect(),
            caption: t.caption.clone(),
            page: t.page,
            children: children(&t.children, picture_no),
        },
    }
}

fn exported_cell(cell: &Cell) -> ExportedCell {
    ExportedCell {
        row: cell.row,
        col: cell.col,
        column_header: cell.column_header,
        text: cell.text().to_string(),
        original_text: cell.original_text().map(String::from),
    }
}

// ── Element images ───────────────────────────────────────────────────────────

/// A table or picture raster to be stored next to the exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementImage {
    /// `pictures/picture-N.png` or `tables/table-N.png`.
    pub relative_path: PathBuf,
    pub png: Vec<u8>,
}

/// PNG artifacts for the selected element kinds, in walk order.
///
/// Rasters that are not PNG already are transcoded; ones that fail to
/// decode are skipped with a warning.
pub fn element_images(tree: &DocumentTree, tables: bool, pictures: bool) -> Vec<ElementImage> {
    let (mut table_no, mut picture_no) = (0usize, 0usize);
    let mut out = Vec::new();
    for item in walk(tree) {
        let (wanted, path) = match item.node {
            Node::Picture(_) => {
                picture_no += 1;
                (pictures, picture_path(picture_no))
            }
            Node::Table(_) => {
                table_no += 1;
                (tables, table_path(table_no))
            }
            Node::Text(_) => continue,
        };
        let Some(image) = item.node.image().filter(|_| wanted) else {
            continue;
        };
        match as_png(image) {
            Ok(png) => out.push(ElementImage {
                relative_path: PathBuf::from(path),
                png,
            }),
            Err(e) => warn!("Skipping {} at {}: {}", path, item.path, e),
        }
    }
    out
}

fn as_png(image: &ImageRef) -> Result<Vec<u8>, image::ImageError> {
    if image.mime == "image/png" {
        return Ok(image.data.clone());
    }
    to_png(&image::load_from_memory(&image.data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PictureNode;
    use image::{DynamicImage, Rgb, RgbImage};

    fn png() -> ImageRef {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])));
        ImageRef::png(to_png(&img).unwrap(), 2, 2)
    }

    fn sample() -> DocumentTree {
        let mut picture = PictureNode::new(Some(png()));
        picture.caption = Some("Figure 1".into());
        let mut picture_node: Node = picture.into();
        picture_node.set_enrichment("Sales | up");

        let mut table = TableNode::from_rows(vec![vec!["Year", "Total"], vec!["2024", "a|b"]]);
        table.image = Some(png());

        DocumentTree::new("report")
            .with_node(TextNode::new(TextLabel::Title, "Annual report").into())
            .with_node(TextNode::heading(1, "Summary").into())
            .with_node(TextNode::paragraph("Revenue grew.").into())
            .with_node(TextNode::new(TextLabel::ListItem, "first").into())
            .with_node(TextNode::new(TextLabel::ListItem, "second").into())
            .with_node(picture_node)
            .with_node(table.into())
    }

    #[test]
    fn markdown_layout() {
        let md = to_markdown(&sample(), &ExportOptions::default());
        let expected = "# Annual report\n\n## Summary\n\nRevenue grew.\n\n- first\n- second\n\n\
                        <!-- image -->\n\nFigure 1\n\nSales | up\n\n\
                        | Year | Total |\n| --- | --- |\n| 2024 | a\\|b |\n";
        assert_eq!(md, expected);
    }

    #[test]
    fn image_modes() {
        let t = sample();
        let embedded = to_markdown(&t, &ExportOptions::new(ImageMode::Embedded));
        assert!(embedded.contains("![Image](data:image/png;base64,"));
        let referenced = to_markdown(&t, &ExportOptions::new(ImageMode::Referenced));
        assert!(referenced.contains("![Image](pictures/picture-1.png)"));

        let no_image = DocumentTree::new("x").with_node(PictureNode::new(None).into());
        let md = to_markdown(&no_image, &ExportOptions::new(ImageMode::Embedded));
        assert_eq!(md, "<!-- image -->\n");
    }

    #[test]
    fn exports_are_deterministic() {
        let t = sample();
        for format in [ExportFormat::Markdown, ExportFormat::Json, ExportFormat::Yaml, ExportFormat::Text] {
            let opts = ExportOptions::new(ImageMode::Embedded);
            assert_eq!(export(&t, format, &opts).unwrap(), export(&t, format, &opts).unwrap());
        }
    }

    #[test]
    fn json_reproduces_leaf_texts() {
        let mut t = sample();
        crate::walker::replace_leaf_text(
            &mut t,
            &crate::walker::LeafLocation::Text(crate::document::NodePath::root(2)),
            "Выручка выросла.".into(),
        );
        let bytes = export(&t, ExportFormat::Json, &ExportOptions::default()).unwrap();
        let back: ExportedDocument = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.leaf_texts(), t.leaf_texts());
        assert!(!String::from_utf8(bytes).unwrap().contains("base64"));

        let yaml = export(&t, ExportFormat::Yaml, &ExportOptions::default()).unwrap();
        let back: ExportedDocument = serde_yaml::from_slice(&yaml).unwrap();
        assert_eq!(back.leaf_texts(), t.leaf_texts());
    }

    #[test]
    fn structural_dump_keeps_provenance() {
        let mut t = sample();
        crate::walker::replace_leaf_text(
            &mut t,
            &crate::walker::LeafLocation::Text(crate::document::NodePath::root(0)),
            "Rapport annuel".into(),
        );
        let doc = ExportedDocument::from_tree(&t, &ExportOptions::default());
        match &doc.nodes[0] {
            ExportedNode::Text { text, original_text, .. } => {
                assert_eq!(text, "Rapport annuel");
                assert_eq!(original_text.as_deref(), Some("Annual report"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn plain_text_drops_pictures() {
        let txt = to_text(&sample());
        assert!(!txt.contains("image"));
        assert!(txt.contains("Sales | up"));
        assert!(txt.ends_with("Year\tTotal\n2024\ta|b\n"));
    }

    #[test]
    fn element_images_follow_selection() {
        let t = sample();
        let all = element_images(&t, true, true);
        let paths: Vec<_> = all.iter().map(|e| e.relative_path.clone()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("pictures/picture-1.png"), PathBuf::from("tables/table-1.png")]
        );
        assert_eq!(element_images(&t, true, false).len(), 1);
        assert!(element_images(&t, false, false).is_empty());
    }

    #[test]
    fn format_parsing() {
        assert_eq!("MD".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert_eq!("yml".parse::<ExportFormat>().unwrap().extension(), "yaml");
        assert!("docx".parse::<ExportFormat>().is_err());
        assert_eq!("referenced".parse::<ImageMode>().unwrap(), ImageMode::Referenced);
    }
}
