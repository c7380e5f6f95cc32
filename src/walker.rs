//! Depth-first, pre-order traversal over a [`DocumentTree`].
//!
//! Every stage that visits nodes (normalisation, enrichment, translation,
//! export, artifact extraction) goes through [`walk`], so the order in which
//! nodes are seen is defined in exactly one place. A walk borrows the tree
//! immutably and never consumes it; start a fresh one whenever needed.
//!
//! Stages that need to mutate collect [`NodePath`]s first and resolve them
//! with [`DocumentTree::node_mut`] afterwards.

use crate::document::{DocumentTree, Node, NodePath};

/// One visited node.
#[derive(Debug, Clone)]
pub struct WalkItem<'a> {
    pub path: NodePath,
    /// Nesting level of the node; roots are 0.
    pub depth: usize,
    pub node: &'a Node,
}

/// Lazy pre-order iterator returned by [`walk`].
pub struct Walk<'a> {
    // Each frame: the sibling slice, the next index into it, and its parent path.
    stack: Vec<(&'a [Node], usize, NodePath)>,
}

/// Start a walk over `tree`: parents before children, siblings in order.
pub fn walk(tree: &DocumentTree) -> Walk<'_> {
    Walk {
        stack: vec![(tree.nodes.as_slice(), 0, NodePath::default())],
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = WalkItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let (nodes, idx, parent) = (frame.0, frame.1, frame.2.clone());
            if idx >= nodes.len() {
                self.stack.pop();
                continue;
            }
            frame.1 += 1;

            let node = &nodes[idx];
            let path = parent.child(idx);
            let depth = path.0.len() - 1;
            if !node.children().is_empty() {
                self.stack.push((node.children(), 0, path.clone()));
            }
            return Some(WalkItem { path, depth, node });
        }
    }
}

/// Location of a translatable leaf: a text node, or one cell of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafLocation {
    Text(NodePath),
    Cell { table: NodePath, index: usize },
}

/// Every text leaf in walk order, paired with its current text.
pub fn leaves(tree: &DocumentTree) -> Vec<(LeafLocation, String)> {
    let mut out = Vec::new();
    for item in walk(tree) {
        match item.node {
            Node::Text(t) => out.push((LeafLocation::Text(item.path), t.text().to_string())),
            Node::Table(table) => {
                for (index, cell) in table.cells.iter().enumerate() {
                    out.push((
                        LeafLocation::Cell {
                            table: item.path.clone(),
                            index,
                        },
                        cell.text().to_string(),
                    ));
                }
            }
            Node::Picture(_) => {}
        }
    }
    out
}

/// Replace the text of the leaf at `loc`, preserving provenance.
///
/// Returns `false` when the location no longer resolves.
pub fn replace_leaf_text(tree: &mut DocumentTree, loc: &LeafLocation, text: String) -> bool {
    match loc {
        LeafLocation::Text(path) => match tree.node_mut(path) {
            Some(Node::Text(t)) => {
                t.replace_text(text);
                true
            }
            _ => false,
        },
        LeafLocation::Cell { table, index } => match tree.node_mut(table) {
            Some(Node::Table(t)) => match t.cells.get_mut(*index) {
                Some(cell) => {
                    cell.replace_text(text);
                    true
                }
                None => false,
            },
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PictureNode, TableNode, TextNode};

    fn sample() -> DocumentTree {
        DocumentTree::new("doc")
            .with_node(
                TextNode::heading(1, "Intro")
                    .with_children(vec![
                        TextNode::paragraph("a").into(),
                        TextNode::paragraph("b")
                            .with_children(vec![TextNode::paragraph("b1").into()])
                            .into(),
                    ])
                    .into(),
            )
            .with_node(PictureNode::new(None).into())
            .with_node(TableNode::from_rows(vec![vec!["x", "y"]]).into())
    }

    fn summary(tree: &DocumentTree) -> Vec<(Vec<usize>, usize, &'static str)> {
        walk(tree)
            .map(|i| (i.path.0.clone(), i.depth, i.node.kind()))
            .collect()
    }

    #[test]
    fn pre_order_with_depths() {
        let tree = sample();
        assert_eq!(
            summary(&tree),
            vec![
                (vec![0], 0, "text"),
                (vec![0, 0], 1, "text"),
                (vec![0, 1], 1, "text"),
                (vec![0, 1, 0], 2, "text"),
                (vec![1], 0, "picture"),
                (vec![2], 0, "table"),
            ]
        );
    }

    #[test]
    fn walks_are_repeatable() {
        let tree = sample();
        assert_eq!(summary(&tree), summary(&tree));
    }

    #[test]
    fn empty_tree_yields_nothing() {
        let tree = DocumentTree::new("empty");
        assert_eq!(walk(&tree).count(), 0);
    }

    #[test]
    fn paths_resolve_to_visited_nodes() {
        let tree = sample();
        for item in walk(&tree) {
            let resolved = tree.node(&item.path).expect("path resolves");
            assert!(std::ptr::eq(resolved, item.node));
        }
    }

    #[test]
    fn leaves_cover_text_and_cells() {
        let tree = sample();
        let texts: Vec<String> = leaves(&tree).into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["Intro", "a", "b", "b1", "x", "y"]);
    }

    #[test]
    fn replace_leaf_text_records_original() {
        let mut tree = sample();
        let loc = LeafLocation::Cell {
            table: NodePath::root(2),
            index: 1,
        };
        assert!(replace_leaf_text(&mut tree, &loc, "Y".into()));
        match tree.node(&NodePath::root(2)) {
            Some(Node::Table(t)) => {
                assert_eq!(t.cells[1].text(), "Y");
                assert_eq!(t.cells[1].original_text(), Some("y"));
            }
            other => panic!("unexpected node: {other:?}"),
        }
        assert!(!replace_leaf_text(
            &mut tree,
            &LeafLocation::Text(NodePath::root(9)),
            "z".into()
        ));
    }
}
