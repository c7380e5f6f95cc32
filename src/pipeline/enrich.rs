//! Enrichment: read the text inside pictures and tables with a vision model
//! and splice it into the tree.
//!
//! For every selected picture/table, in walk order:
//!
//! 1. rasterise the node's image ([`crate::pipeline::render`]),
//! 2. make one vision call bounded by `vision_timeout`,
//! 3. clean the answer ([`crate::pipeline::postprocess`]),
//! 4. splice it as the node's first child ([`Node::set_enrichment`]).
//!
//! ## Failure handling
//!
//! | Outcome | Node text | File |
//! |---------|-----------|------|
//! | text | cleaned text | continues |
//! | no text / malformed / missing or broken image | `""` | continues |
//! | timeout | delay placeholder | continues |
//! | service unavailable | - | aborts with `ServiceUnavailable` |
//!
//! There is no retry here: a timed-out node is retried by re-running the
//! file, not by hammering a slow service.

use crate::config::PipelineConfig;
use crate::document::{DocumentTree, ImageRef, Node, NodePath};
use crate::error::{DocflowError, NodeError};
use crate::pipeline::{postprocess, render};
use crate::prompts::{DELAY_PLACEHOLDER, VISION_PROMPT};
use crate::services::vision::{VisionError, VisionService};
use crate::walker::walk;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Which element kinds to enrich.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichOptions {
    pub pictures: bool,
    pub tables: bool,
}

impl EnrichOptions {
    pub fn all() -> Self {
        Self {
            pictures: true,
            tables: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.pictures && !self.tables
    }

    fn wants(&self, node: &Node) -> bool {
        match node {
            Node::Picture(_) => self.pictures,
            Node::Table(_) => self.tables,
            Node::Text(_) => false,
        }
    }
}

/// Outcome of one vision call.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentResult {
    Text(String),
    /// The service answered but found no text.
    Empty,
    /// Non-fatal failure; the reason is kept for the report.
    Failed(NodeError),
}

/// What happened during one `enrich` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub pictures: usize,
    pub tables: usize,
    /// Nodes that received non-empty text.
    pub enriched: usize,
    pub empty: usize,
    pub timed_out: usize,
    pub failures: Vec<NodeError>,
    pub duration_ms: u64,
}

/// Vision-backed enrichment of pictures and tables.
pub struct EnrichmentStage {
    vision: Arc<dyn VisionService>,
    prompt: String,
    timeout: Duration,
    max_pixels: u32,
    placeholder: String,
}

impl EnrichmentStage {
    pub fn new(vision: Arc<dyn VisionService>) -> Self {
        Self {
            vision,
            prompt: VISION_PROMPT.to_string(),
            timeout: Duration::from_secs(25),
            max_pixels: 2000,
            placeholder: DELAY_PLACEHOLDER.to_string(),
        }
    }

    pub fn from_config(vision: Arc<dyn VisionService>, config: &PipelineConfig) -> Self {
        Self {
            vision,
            prompt: config
                .vision_prompt
                .clone()
                .unwrap_or_else(|| VISION_PROMPT.to_string()),
            timeout: config.vision_timeout(),
            max_pixels: config.max_rendered_pixels,
            placeholder: config.delay_placeholder.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enrich every selected picture and table of `tree` in place.
    ///
    /// # Errors
    /// Only [`DocflowError::ServiceUnavailable`]; the tree is left untouched
    /// in that case.
    pub async fn enrich(
        &self,
        tree: &mut DocumentTree,
        options: &EnrichOptions,
    ) -> Result<EnrichmentReport, DocflowError> {
        let start = Instant::now();
        let mut report = EnrichmentReport::default();
        if options.is_empty() {
            return Ok(report);
        }

        let targets: Vec<(NodePath, bool, Option<ImageRef>)> = walk(tree)
            .filter(|item| options.wants(item.node))
            .map(|item| {
                (
                    item.path,
                    matches!(item.node, Node::Table(_)),
                    item.node.image().cloned(),
                )
            })
            .collect();
        info!("Enriching {} nodes in '{}'", targets.len(), tree.name);

        let mut spliced: Vec<(NodePath, String)> = Vec::with_capacity(targets.len());
        for (path, is_table, image) in targets {
            if is_table {
                report.tables += 1;
            } else {
                report.pictures += 1;
            }

            let text = match self.enrich_node(&path, image).await? {
                EnrichmentResult::Text(text) => {
                    report.enriched += 1;
                    text
                }
                EnrichmentResult::Empty => {
                    report.empty += 1;
                    String::new()
                }
                EnrichmentResult::Failed(err) => {
                    warn!("{}", err);
                    let text = if matches!(err, NodeError::VisionTimeout { .. }) {
                        report.timed_out += 1;
                        self.placeholder.clone()
                    } else {
                        report.empty += 1;
                        String::new()
                    };
                    report.failures.push(err);
                    text
                }
            };
            spliced.push((path, text));
        }

        // Pre-order puts descendants after ancestors; splicing in reverse
        // keeps every pending path valid.
        for (path, text) in spliced.into_iter().rev() {
            if let Some(node) = tree.node_mut(&path) {
                node.set_enrichment(text);
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Enrichment done: {} text, {} empty, {} timed out in {}ms",
            report.enriched, report.empty, report.timed_out, report.duration_ms
        );
        Ok(report)
    }

    /// One node: rasterise, a single bounded call, cleanup.
    async fn enrich_node(
        &self,
        path: &NodePath,
        image: Option<ImageRef>,
    ) -> Result<EnrichmentResult, DocflowError> {
        let path_str = path.to_string();
        let Some(image) = image else {
            return Ok(EnrichmentResult::Failed(NodeError::MissingImage { path: path_str }));
        };

        let encoded = match render::rasterize(image, self.max_pixels).await {
            Ok(e) => e,
            Err(detail) => {
                return Ok(EnrichmentResult::Failed(NodeError::ImageFailed {
                    path: path_str,
                    detail,
                }))
            }
        };

        let timed_out = || {
            EnrichmentResult::Failed(NodeError::VisionTimeout {
                path: path_str.clone(),
                secs: self.timeout.as_secs(),
            })
        };

        let call = self.vision.extract_text(&encoded, &self.prompt);
        let answer = match tokio::time::timeout(self.timeout, call).await {
            Err(_elapsed) => return Ok(timed_out()),
            Ok(Err(VisionError::Timeout)) => return Ok(timed_out()),
            Ok(Err(VisionError::Unavailable(detail))) => {
                return Err(DocflowError::ServiceUnavailable {
                    service: "vision".to_string(),
                    detail,
                })
            }
            Ok(Err(VisionError::Malformed(detail))) => {
                return Ok(EnrichmentResult::Failed(NodeError::MalformedResponse {
                    path: path_str,
                    detail,
                }))
            }
            Ok(Ok(answer)) => answer,
        };

        let text = postprocess::clean_vision_text(&answer);
        debug!("Node {}: {} chars of text", path_str, text.len());
        Ok(if text.is_empty() {
            EnrichmentResult::Empty
        } else {
            EnrichmentResult::Text(text)
        })
    }
}
