//! Prompts and fixed user-visible strings.
//!
//! Callers can override the vision prompt via
//! [`crate::config::PipelineConfig::vision_prompt`]; the constants here are
//! used only when no override is provided.

/// Default prompt sent with every picture or table image.
///
/// The contract: transcribe visible text verbatim as markdown, and answer
/// with nothing at all when there is no text. An empty answer becomes an
/// empty enrichment node, so a description of the imagery would be worse
/// than silence.
pub const VISION_PROMPT: &str = r#"You are a precise document transcriber. The image is a single figure or table cut out of a larger document.

Follow these rules precisely:

1. Extract ALL visible text verbatim, in reading order. Do not translate, summarise or correct it.
2. Format the result as markdown:
   - Tables become GFM pipe tables with a header separator row
   - Lists become `-` or `1.` items
   - Formulas use LaTeX: $inline$ and $$display$$
3. If the image contains no text, return an EMPTY response.
4. NEVER describe pictures, photos, charts, colours or layout. Only text that is written in the image.
5. Output ONLY the markdown. No fences, no commentary, no "Here is the text"."#;

/// Spliced in place of a picture's text when the vision call times out.
pub const DELAY_PLACEHOLDER: &str = "Image text is not available yet due to a processing delay; please retry.";

/// Returned by the summarizer wrapper when the service cannot be reached.
pub const SUMMARY_FALLBACK: &str = "Summary unavailable";
