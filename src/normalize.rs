//! Text normalisation applied to converter output before any other stage.
//!
//! Structural extractors hand back text exactly as they found it in the
//! file, which for scanned or oddly-encoded documents includes:
//!
//! - literal escape sequences (`\xD0\x9F`, `\u041F`, `/uni041F`) left behind
//!   by PDF glyph tables,
//! - mojibake, i.e. UTF-8 bytes that were decoded as Windows-1252/Latin-1
//!   (`ÐŸÑ€Ð¸Ð²ÐµÑ‚` instead of `Привет`),
//! - invisible code points (zero-width spaces, BOM, soft hyphens).
//!
//! Each pass is a pure `&str → String` function; [`normalize_text`] runs them
//! in order and [`normalize_tree`] applies that to every leaf.

use crate::document::{DocumentTree, Node};
use crate::walker::walk;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Run every normalisation pass over `input`.
///
/// Order matters: escapes are decoded first so their output can be repaired
/// as mojibake, and invisible characters are stripped after both because
/// decoding can produce them.
pub fn normalize_text(input: &str) -> String {
    let s = decode_hex_escapes(input);
    let s = repair_mojibake(&s);
    let s = remove_invisible_chars(&s);
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    s.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Normalise every text node and table cell in place.
///
/// Returns the number of leaves whose text changed. This is cleaning, not a
/// content mutation, so `original_text` is left untouched.
pub fn normalize_tree(tree: &mut DocumentTree) -> usize {
    let paths: Vec<_> = walk(tree)
        .filter(|i| matches!(i.node, Node::Text(_) | Node::Table(_)))
        .map(|i| i.path)
        .collect();

    let mut changed = 0;
    for path in paths {
        match tree.node_mut(&path) {
            Some(Node::Text(t)) => {
                let clean = normalize_text(t.text());
                if clean != t.text() {
                    t.set_clean_text(clean);
                    changed += 1;
                }
            }
            Some(Node::Table(table)) => {
                for cell in &mut table.cells {
                    let clean = normalize_text(cell.text());
                    if clean != cell.text() {
                        cell.set_clean_text(clean);
                        changed += 1;
                    }
                }
            }
            _ => {}
        }
    }
    debug!("Normalised {} leaves in '{}'", changed, tree.name);
    changed
}

// ── Invisible characters ─────────────────────────────────────────────────────

const INVISIBLE: [char; 10] = [
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{200E}', '\u{200F}', '\u{2060}', '\u{FEFF}',
    '\u{00AD}', '\u{FFFC}', '\u{180E}',
];

/// Strip zero-width characters, BOMs, soft hyphens and C0/C1 control codes
/// other than tab and newline.
pub fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !INVISIBLE.contains(c)
                && !(c.is_control() && *c != '\n' && *c != '\t' && *c != '\r')
        })
        .collect()
}

// ── Escape sequences ────────────────────────────────────────────────────────

static RE_HEX_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\\x[0-9A-Fa-f]{2})+").unwrap());
static RE_UNICODE_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\u([0-9A-Fa-f]{4})|/uni([0-9A-Fa-f]{4})").unwrap());

/// Decode literal `\xNN` runs (as UTF-8 bytes) and `\uNNNN` / `/uniNNNN`
/// code points. Runs that do not form valid UTF-8 are left as written.
pub fn decode_hex_escapes(input: &str) -> String {
    let s = RE_HEX_RUN.replace_all(input, |caps: &regex::Captures<'_>| {
        let run = &caps[0];
        let bytes: Vec<u8> = run
            .split("\\x")
            .filter(|h| !h.is_empty())
            .filter_map(|h| u8::from_str_radix(h, 16).ok())
            .collect();
        match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(_) => run.to_string(),
        }
    });
    RE_UNICODE_ESCAPE
        .replace_all(&s, |caps: &regex::Captures<'_>| {
            let hex = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            u32::from_str_radix(hex, 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

// ── Mojibake ────────────────────────────────────────────────────────────────

/// Windows-1252 bytes 0x80–0x9F that map to code points outside Latin-1.
const CP1252_HIGH: [(char, u8); 27] = [
    ('€', 0x80), ('‚', 0x82), ('ƒ', 0x83), ('„', 0x84), ('…', 0x85), ('†', 0x86),
    ('‡', 0x87), ('ˆ', 0x88), ('‰', 0x89), ('Š', 0x8A), ('‹', 0x8B), ('Œ', 0x8C),
    ('Ž', 0x8E), ('‘', 0x91), ('’', 0x92), ('“', 0x93), ('”', 0x94), ('•', 0x95),
    ('–', 0x96), ('—', 0x97), ('˜', 0x98), ('™', 0x99), ('š', 0x9A), ('›', 0x9B),
    ('œ', 0x9C), ('ž', 0x9E), ('Ÿ', 0x9F),
];

fn cp1252_byte(c: char) -> Option<u8> {
    let cp = c as u32;
    if cp < 0x80 || (0xA0..=0xFF).contains(&cp) || (0x80..=0x9F).contains(&cp) {
        return Some(cp as u8);
    }
    CP1252_HIGH.iter().find(|(ch, _)| *ch == c).map(|(_, b)| *b)
}

/// Re-decode whitespace-separated tokens that are UTF-8 mis-read as
/// Windows-1252. Tokens that do not round-trip to valid UTF-8 are kept,
/// so genuine Latin-1 words like `café` are never touched.
pub fn repair_mojibake(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut token = String::new();
    for c in input.chars() {
        if c.is_whitespace() {
            out.push_str(&repair_token(&token));
            token.clear();
            out.push(c);
        } else {
            token.push(c);
        }
    }
    out.push_str(&repair_token(&token));
    out
}

fn repair_token(token: &str) -> String {
    if token.is_ascii() {
        return token.to_string();
    }
    let bytes: Option<Vec<u8>> = token.chars().map(cp1252_byte).collect();
    match bytes.map(String::from_utf8) {
        Some(Ok(fixed)) if fixed != token => fixed,
        _ => token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{TableNode, TextNode};

    #[test]
    fn repairs_cyrillic_mojibake() {
        assert_eq!(repair_mojibake("ÐŸÑ€Ð¸Ð²ÐµÑ‚ Ð¼Ð¸Ñ€"), "Привет мир");
    }

    #[test]
    fn repairs_latin_mojibake() {
        assert_eq!(repair_mojibake("cafÃ© crÃ¨me"), "café crème");
    }

    #[test]
    fn leaves_valid_text_alone() {
        assert_eq!(repair_mojibake("café Привет"), "café Привет");
        assert_eq!(repair_mojibake("plain ascii"), "plain ascii");
    }

    #[test]
    fn decodes_hex_runs_as_utf8() {
        assert_eq!(decode_hex_escapes(r"\xD0\x9F\xD1\x80\xD0\xB8"), "При");
        assert_eq!(decode_hex_escapes(r"a\x41b"), "aAb");
    }

    #[test]
    fn keeps_invalid_hex_runs() {
        assert_eq!(decode_hex_escapes(r"\xFF\xFE"), r"\xFF\xFE");
    }

    #[test]
    fn decodes_unicode_escapes() {
        assert_eq!(decode_hex_escapes(r"\u041F/uni0440"), "Пр");
    }

    #[test]
    fn strips_invisible_chars() {
        let input = "he\u{200B}llo\u{FEFF} wor\u{00AD}ld\u{0007}";
        assert_eq!(remove_invisible_chars(input), "hello world");
    }

    #[test]
    fn normalize_text_runs_all_passes() {
        let input = "\u{FEFF}ÐŸÑ€Ð¸Ð²ÐµÑ‚   \r\n\\x41  ";
        assert_eq!(normalize_text(input), "Привет\nA");
    }

    #[test]
    fn normalize_tree_touches_text_and_cells_without_provenance() {
        let mut tree = DocumentTree::new("doc")
            .with_node(TextNode::paragraph("a\u{200B}b").into())
            .with_node(TextNode::paragraph("clean").into())
            .with_node(TableNode::from_rows(vec![vec!["cafÃ©", "ok"]]).into());

        assert_eq!(normalize_tree(&mut tree), 2);
        assert_eq!(tree.leaf_texts(), vec!["ab", "clean", "café", "ok"]);
        match &tree.nodes[0] {
            Node::Text(t) => assert_eq!(t.original_text(), None),
            other => panic!("unexpected node: {other:?}"),
        }
    }
}
