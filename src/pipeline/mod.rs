//! Pipeline stages for one converted document.
//!
//! Each submodule implements exactly one transformation step, so every stage
//! can be tested on its own and swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! dispatch ──▶ extract ──▶ (normalize) ──▶ enrich ──▶ translate ──▶ export
//! (format)     (tree)                      (vision)   (fan-out)     (bytes)
//! ```
//!
//! 1. [`dispatch`]: pick the format group and bind a converter to the file
//! 2. [`extract`]: run the structural extractor on the conversion pool;
//!    CPU-bound, so it never runs on a Tokio worker
//! 3. [`enrich`]: read pictures and tables with the vision service, via
//!    [`render`] (decode, size cap), [`encode`] (PNG, base64) and
//!    [`postprocess`] (answer cleanup)
//! 4. [`translate`]: bounded-concurrency translation of every text leaf
//! 5. [`export`]: markdown / JSON / YAML / text, plus element images

pub mod dispatch;
pub mod encode;
pub mod enrich;
pub mod export;
pub mod extract;
pub mod postprocess;
pub mod render;
pub mod translate;
