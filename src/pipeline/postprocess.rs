//! Post-processing: deterministic cleanup of vision-model output before it
//! is spliced into the tree as an enrichment node.
//!
//! Even with a strict prompt, vision models:
//!
//! - wrap the answer in ` ```markdown ` fences,
//! - open with "Here is the extracted text:",
//! - answer "No text found." instead of nothing,
//! - invent `![figure](image.png)` links,
//! - forget or duplicate table separator rows.
//!
//! Each rule below is a pure `&str → String` pass. They run in a fixed order:
//! line endings are normalised first so every later rule can split on `\n`,
//! and the "no text" check runs last, on the fully cleaned text.

use crate::normalize::remove_invisible_chars;
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to a raw vision answer.
///
/// The result carries no trailing newline and is empty when the model
/// reported that the image holds no text.
pub fn clean_vision_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_markdown_fences(&s);
    let s = strip_preamble(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = fix_broken_tables(&s);
    let s = remove_mid_table_separators(&s);
    let s = remove_hallucinated_images(&s);
    let s = remove_invisible_chars(&s);
    let s = s.trim().to_string();
    if is_no_text_answer(&s) {
        String::new()
    } else {
        s
    }
}

// ── Line endings and whitespace ─────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Node text keeps at most one blank line between blocks.
fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Wrapping noise ───────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md|text)?\n(.*)\n```$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

static RE_PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(here is|here's|here are|below is|sure[,!]?)[^\n]{0,80}:\s*\n").unwrap()
});

fn strip_preamble(input: &str) -> String {
    RE_PREAMBLE.replace(input, "").into_owned()
}

static RE_NO_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^[\[(*_]*(no (visible |readable |legible )?text( (found|present|detected|visible))?|there is no (visible |readable )?text[^\n]*|the image (contains|has) no (visible |readable )?text[^\n]*|empty)[.!]?[\])*_]*$",
    )
    .unwrap()
});

fn is_no_text_answer(input: &str) -> bool {
    RE_NO_TEXT.is_match(input)
}

// ── Tables ───────────────────────────────────────────────────────────────────

/// Insert a separator row after a table header that lacks one.
fn fix_broken_tables(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut result: Vec<String> = Vec::with_capacity(lines.len() + 4);
    let mut prev_is_row = false;

    for (i, line) in lines.iter().enumerate() {
        result.push(line.to_string());
        let row = is_table_row(line);
        let starts_table = row && !prev_is_row && !is_separator_row(line);
        if starts_table {
            let next = lines.get(i + 1).copied().unwrap_or("");
            if is_table_row(next) && !is_separator_row(next) {
                let cols = line.trim().matches('|').count().saturating_sub(1).max(1);
                let sep: String = std::iter::once("|")
                    .chain(std::iter::repeat_n(" --- |", cols))
                    .collect();
                result.push(sep);
            }
        }
        prev_is_row = row;
    }
    result.join("\n")
}

/// GFM allows a separator only as a table's second row; drop any others.
fn remove_mid_table_separators(input: &str) -> String {
    let mut result: Vec<&str> = Vec::new();
    let mut row_in_table = 0usize;
    for line in input.lines() {
        if is_table_row(line) {
            row_in_table += 1;
            if is_separator_row(line) && row_in_table != 2 {
                continue;
            }
        } else {
            row_in_table = 0;
        }
        result.push(line);
    }
    result.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

// ── Images ───────────────────────────────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

const PLACEHOLDER_HOSTS: [&str; 6] = [
    "example.com",
    "placeholder.com",
    "dummyimage.com",
    "lorempixel.com",
    "picsum.photos",
    "placehold.it",
];

fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    !(u.starts_with("http://") || u.starts_with("https://"))
        || PLACEHOLDER_HOSTS.iter().any(|h| u.contains(h))
}

/// The crop has no files of its own, so any local or placeholder image link
/// is invented. Keep its alt text as italics.
fn remove_hallucinated_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if !is_placeholder_url(&caps[2]) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_and_preamble() {
        let input = "```markdown\nHere is the extracted text:\n# Revenue\nQ1 up\n```";
        assert_eq!(clean_vision_text(input), "# Revenue\nQ1 up");
    }

    #[test]
    fn no_text_answers_become_empty() {
        for answer in ["No text found.", "no visible text", "*There is no text in this image.*", "[empty]"] {
            assert_eq!(clean_vision_text(answer), "", "answer: {answer}");
        }
        assert_eq!(clean_vision_text("  \n\n "), "");
    }

    #[test]
    fn keeps_text_mentioning_no_text_inside() {
        let s = "Warning: no text messages while driving";
        assert_eq!(clean_vision_text(s), s);
    }

    #[test]
    fn collapses_blank_runs_and_trims() {
        assert_eq!(clean_vision_text("a   \r\n\r\n\r\n\r\nb\n\n"), "a\n\nb");
    }

    #[test]
    fn inserts_missing_table_separator() {
        let out = fix_broken_tables("| A | B |\n| 1 | 2 |\n| 3 | 4 |");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(is_separator_row(lines[1]));
        assert!(!is_separator_row(lines[3]));
    }

    #[test]
    fn well_formed_table_unchanged() {
        let t = "| H1 | H2 |\n| --- | --- |\n| a | b |";
        assert_eq!(fix_broken_tables(t), t);
        assert_eq!(remove_mid_table_separators(t), t);
    }

    #[test]
    fn drops_mid_table_separators() {
        let input = "| A | B |\n| --- | --- |\n| 1 | 2 |\n| --- | --- |\n| 3 | 4 |";
        let out = remove_mid_table_separators(input);
        assert_eq!(out.lines().filter(|l| is_separator_row(l)).count(), 1);
        assert!(out.contains("| 3 | 4 |"));
    }

    #[test]
    fn hallucinated_images_become_captions() {
        assert_eq!(remove_hallucinated_images("![Chart](chart.png)"), "*Chart*");
        assert_eq!(remove_hallucinated_images("x ![](image-url) y"), "x  y");
        let real = "![Fig](https://arxiv.org/fig1.png)";
        assert_eq!(remove_hallucinated_images(real), real);
    }

    #[test]
    fn strips_invisible_chars() {
        assert_eq!(clean_vision_text("he\u{200B}llo"), "hello");
    }
}
