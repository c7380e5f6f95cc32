//! The document tree produced by a structural extractor.
//!
//! A [`DocumentTree`] is an ordered forest of [`Node`]s. Every node may own
//! children, so headings can nest paragraphs and lists can nest items the way
//! the converter laid them out.
//!
//! ## Provenance
//!
//! Text-bearing leaves ([`TextNode`] and table [`Cell`]) keep the text they
//! had before their first mutation in `original_text`. The field is private
//! and only written by [`TextNode::replace_text`] / [`Cell::replace_text`],
//! which set it once and never again, so a translated tree can always be
//! audited or rolled back to what the converter produced.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A converted document: a name (usually the file stem) plus root nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTree {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl DocumentTree {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Append a root node and return `self` for chaining.
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolve a path produced by [`crate::walker::walk`].
    pub fn node(&self, path: &NodePath) -> Option<&Node> {
        let (first, rest) = path.0.split_first()?;
        let mut node = self.nodes.get(*first)?;
        for idx in rest {
            node = node.children().get(*idx)?;
        }
        Some(node)
    }

    pub fn node_mut(&mut self, path: &NodePath) -> Option<&mut Node> {
        let (first, rest) = path.0.split_first()?;
        let mut node = self.nodes.get_mut(*first)?;
        for idx in rest {
            node = node.children_mut().get_mut(*idx)?;
        }
        Some(node)
    }

    /// Current text of every leaf (text nodes and table cells) in walk order.
    pub fn leaf_texts(&self) -> Vec<String> {
        let mut out = Vec::new();
        for item in crate::walker::walk(self) {
            match item.node {
                Node::Text(t) => out.push(t.text().to_string()),
                Node::Table(table) => out.extend(table.cells.iter().map(|c| c.text().to_string())),
                Node::Picture(_) => {}
            }
        }
        out
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_texts().len()
    }
}

/// Position of a node: one index per tree level, starting at the roots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodePath(pub Vec<usize>);

impl NodePath {
    pub fn root(idx: usize) -> Self {
        NodePath(vec![idx])
    }

    pub fn child(&self, idx: usize) -> Self {
        let mut v = self.0.clone();
        v.push(idx);
        NodePath(v)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "/{}", parts.join("/"))
    }
}

/// One element of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Text(TextNode),
    Picture(PictureNode),
    Table(TableNode),
}

impl Node {
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Text(n) => &n.children,
            Node::Picture(n) => &n.children,
            Node::Table(n) => &n.children,
        }
    }

    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        match self {
            Node::Text(n) => &mut n.children,
            Node::Picture(n) => &mut n.children,
            Node::Table(n) => &mut n.children,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Text(_) => "text",
            Node::Picture(_) => "picture",
            Node::Table(_) => "table",
        }
    }

    /// Raster of a picture or table, if the converter generated one.
    pub fn image(&self) -> Option<&ImageRef> {
        match self {
            Node::Picture(p) => p.image.as_ref(),
            Node::Table(t) => t.image.as_ref(),
            Node::Text(_) => None,
        }
    }

    /// The synthesized text child of an enriched picture or table.
    pub fn enrichment(&self) -> Option<&TextNode> {
        if matches!(self, Node::Text(_)) {
            return None;
        }
        match self.children().first() {
            Some(Node::Text(t)) if t.label == TextLabel::Enrichment => Some(t),
            _ => None,
        }
    }

    /// Splice `text` as the first child of a picture or table.
    ///
    /// Re-enriching replaces the previous synthesized child in place so child
    /// indices of the other children stay put. Text nodes are left untouched.
    pub fn set_enrichment(&mut self, text: impl Into<String>) {
        if matches!(self, Node::Text(_)) {
            return;
        }
        let synthesized = Node::Text(TextNode::new(TextLabel::Enrichment, text));
        let replace = self.enrichment().is_some();
        let children = self.children_mut();
        if replace {
            children[0] = synthesized;
        } else {
            children.insert(0, synthesized);
        }
    }
}

/// Semantic role of a text node. Drives markdown rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextLabel {
    Title,
    SectionHeader,
    #[default]
    Paragraph,
    ListItem,
    Caption,
    Code,
    Formula,
    Footnote,
    /// Text synthesized from a picture or table by the vision service.
    Enrichment,
}

fn default_level() -> u8 {
    1
}

/// A text-bearing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    #[serde(default)]
    pub label: TextLabel,
    /// Heading depth for [`TextLabel::SectionHeader`], nesting depth for list items.
    #[serde(default = "default_level")]
    pub level: u8,
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl TextNode {
    pub fn new(label: TextLabel, text: impl Into<String>) -> Self {
        Self {
            label,
            level: 1,
            text: text.into(),
            original_text: None,
            children: Vec::new(),
        }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::new(TextLabel::Paragraph, text)
    }

    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self {
            level: level.max(1),
            ..Self::new(TextLabel::SectionHeader, text)
        }
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Text before the first mutation, if the node was ever mutated.
    pub fn original_text(&self) -> Option<&str> {
        self.original_text.as_deref()
    }

    /// Replace the current text, preserving the pre-mutation text once.
    pub fn replace_text(&mut self, new_text: impl Into<String>) {
        if self.original_text.is_none() {
            self.original_text = Some(std::mem::take(&mut self.text));
        }
        self.text = new_text.into();
    }

    /// Overwrite text without recording provenance. Used for cleaning text
    /// before it is considered part of the tree.
    pub(crate) fn set_clean_text(&mut self, text: String) {
        self.text = text;
    }
}

impl From<TextNode> for Node {
    fn from(n: TextNode) -> Self {
        Node::Text(n)
    }
}

/// A figure or embedded image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PictureNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl PictureNode {
    pub fn new(image: Option<ImageRef>) -> Self {
        Self {
            image,
            ..Default::default()
        }
    }
}

impl From<PictureNode> for Node {
    fn from(n: PictureNode) -> Self {
        Node::Picture(n)
    }
}

/// A table: a grid of cells plus an optional raster of the whole table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    pub num_rows: usize,
    pub num_cols: usize,
    #[serde(default)]
    pub cells: Vec<Cell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl TableNode {
    /// Build a table from rows of cell text. The first row is the header.
    pub fn from_rows<S: Into<String>>(rows: Vec<Vec<S>>) -> Self {
        let num_rows = rows.len();
        let num_cols = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let cells = rows
            .into_iter()
            .enumerate()
            .flat_map(|(r, row)| {
                row.into_iter()
                    .enumerate()
                    .map(move |(c, text)| Cell::new(r, c, text).header(r == 0))
            })
            .collect();
        Self {
            num_rows,
            num_cols,
            cells,
            ..Default::default()
        }
    }

    /// Cell text laid out as a dense `num_rows × num_cols` grid.
    pub fn grid(&self) -> Vec<Vec<&str>> {
        let mut grid = vec![vec![""; self.num_cols]; self.num_rows];
        for cell in &self.cells {
            if let Some(slot) = grid.get_mut(cell.row).and_then(|r| r.get_mut(cell.col)) {
                *slot = cell.text();
            }
        }
        grid
    }
}

impl From<TableNode> for Node {
    fn from(n: TableNode) -> Self {
        Node::Table(n)
    }
}

/// One table cell; behaves like a text leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    #[serde(default)]
    pub column_header: bool,
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_text: Option<String>,
}

impl Cell {
    pub fn new(row: usize, col: usize, text: impl Into<String>) -> Self {
        Self {
            row,
            col,
            column_header: false,
            text: text.into(),
            original_text: None,
        }
    }

    pub fn header(mut self, yes: bool) -> Self {
        self.column_header = yes;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn original_text(&self) -> Option<&str> {
        self.original_text.as_deref()
    }

    pub fn replace_text(&mut self, new_text: impl Into<String>) {
        if self.original_text.is_none() {
            self.original_text = Some(std::mem::take(&mut self.text));
        }
        self.text = new_text.into();
    }

    pub(crate) fn set_clean_text(&mut self, text: String) {
        self.text = text;
    }
}

/// Encoded raster attached to a picture or table (PNG/JPEG bytes).
///
/// Serialised as base64 so extractor output can carry it in JSON.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub mime: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    pub data: Vec<u8>,
}

impl ImageRef {
    pub fn png(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            mime: "image/png".to_string(),
            width,
            height,
            data,
        }
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("mime", &self.mime)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("data", &format_args!("<{} bytes>", self.data.len()))
            .finish()
    }
}

fn to_base64<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&STANDARD.encode(data))
}

fn from_base64<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(d)?;
    STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn original_text_is_set_once() {
        let mut node = TextNode::paragraph("Привет");
        assert_eq!(node.original_text(), None);

        node.replace_text("Hello");
        node.replace_text("Hi");

        assert_eq!(node.text(), "Hi");
        assert_eq!(node.original_text(), Some("Привет"));
    }

    #[test]
    fn cell_original_text_is_set_once() {
        let mut cell = Cell::new(0, 0, "a");
        cell.replace_text("b");
        cell.replace_text("c");
        assert_eq!(cell.text(), "c");
        assert_eq!(cell.original_text(), Some("a"));
    }

    #[test]
    fn path_resolution() {
        let tree = DocumentTree::new("doc").with_node(
            TextNode::heading(1, "Intro")
                .with_children(vec![TextNode::paragraph("body").into()])
                .into(),
        );
        let child = tree.node(&NodePath(vec![0, 0])).unwrap();
        assert!(matches!(child, Node::Text(t) if t.text() == "body"));
        assert!(tree.node(&NodePath(vec![0, 1])).is_none());
        assert!(tree.node(&NodePath(vec![])).is_none());
    }

    #[test]
    fn set_enrichment_inserts_then_replaces() {
        let mut node: Node = PictureNode::new(None).into();
        node.children_mut().push(TextNode::paragraph("caption").into());

        node.set_enrichment("first");
        assert_eq!(node.children().len(), 2);
        assert_eq!(node.enrichment().map(|t| t.text()), Some("first"));

        node.set_enrichment("second");
        assert_eq!(node.children().len(), 2);
        assert_eq!(node.enrichment().map(|t| t.text()), Some("second"));
    }

    #[test]
    fn table_grid_fills_missing_cells() {
        let mut table = TableNode::from_rows(vec![vec!["A", "B"], vec!["1"]]);
        table.num_rows = 2;
        let grid = table.grid();
        assert_eq!(grid, vec![vec!["A", "B"], vec!["1", ""]]);
        assert!(table.cells[0].column_header);
        assert!(!table.cells[2].column_header);
    }

    #[test]
    fn image_ref_serialises_as_base64() {
        let img = ImageRef::png(vec![1, 2, 3], 1, 1);
        let json = serde_json::to_string(&img).unwrap();
        assert!(json.contains("AQID"), "got: {json}");
        let back: ImageRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, vec![1, 2, 3]);
    }

    #[test]
    fn leaf_texts_include_cells() {
        let tree = DocumentTree::new("doc")
            .with_node(TextNode::paragraph("p").into())
            .with_node(TableNode::from_rows(vec![vec!["h1", "h2"], vec!["v1", "v2"]]).into());
        assert_eq!(tree.leaf_texts(), vec!["p", "h1", "h2", "v1", "v2"]);
        assert_eq!(tree.leaf_count(), 5);
    }
}
