//! Translation: every text leaf and table cell, fanned out under a
//! concurrency bound and spliced back by position.
//!
//! ## Flow
//!
//! 1. One walk collects [`TranslationUnit`]s (text nodes and cells) in order.
//! 2. Every unit is dispatched at once; a per-call [`Semaphore`] lets at most
//!    `concurrency` calls be in flight, the rest queue for a permit.
//! 3. Each call is bounded by `call_timeout` and retried under the
//!    [`RetryPolicy`] (timeouts only, by default).
//! 4. After full fan-in, unit *i*'s result is written to unit *i*'s leaf.
//!
//! ## Degradation
//!
//! - retries exhausted → the leaf keeps its own text,
//! - the service answers non-2xx → the leaf gets `Translation error: …`,
//! - blank leaves are never sent.
//!
//! Once the session's [`CancellationToken`] fires, units still waiting for
//! a permit are not sent; calls already in flight finish.

use crate::config::{PipelineConfig, RetryPolicy};
use crate::document::DocumentTree;
use crate::error::NodeError;
use crate::services::translator::{LanguagePair, TranslationError, TranslationService};
use crate::walker::{leaves, replace_leaf_text, LeafLocation};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One leaf to translate: where it lives and what it says now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    pub index: usize,
    pub location: LeafLocation,
    pub text: String,
}

/// Collect the units of `tree` in walk order.
pub fn collect_units(tree: &DocumentTree) -> Vec<TranslationUnit> {
    leaves(tree)
        .into_iter()
        .enumerate()
        .map(|(index, (location, text))| TranslationUnit {
            index,
            location,
            text,
        })
        .collect()
}

/// What happened during one translation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationReport {
    pub units: usize,
    pub translated: usize,
    /// Blank leaves that were never sent.
    pub skipped: usize,
    /// Units that kept their original text after giving up.
    pub kept_original: usize,
    /// Units that received inline error text.
    pub inline_errors: usize,
    /// Units never sent because the session was cancelled.
    pub cancelled: usize,
    pub failures: Vec<NodeError>,
    pub duration_ms: u64,
}

#[derive(Debug)]
enum UnitOutcome {
    Translated(String),
    Skipped,
    KeptOriginal(NodeError),
    InlineError(String, NodeError),
    Cancelled,
}

/// Bounded-concurrency translation of a whole tree.
pub struct TranslationStage {
    service: Arc<dyn TranslationService>,
    concurrency: usize,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl TranslationStage {
    pub fn new(service: Arc<dyn TranslationService>) -> Self {
        Self {
            service,
            concurrency: 5,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(service: Arc<dyn TranslationService>, config: &PipelineConfig) -> Self {
        Self {
            service,
            concurrency: config.translation_concurrency,
            retry: config.translation_retry.clone(),
            call_timeout: config.translation_call_timeout(),
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Translate a copy of `tree`; the input is left as it was.
    pub async fn translate(
        &self,
        tree: &DocumentTree,
        langs: &LanguagePair,
        cancel: &CancellationToken,
    ) -> (DocumentTree, TranslationReport) {
        let mut copy = tree.clone();
        let report = self.translate_in_place(&mut copy, langs, cancel).await;
        (copy, report)
    }

    /// Translate `tree` itself. Replaced leaves keep their pre-translation
    /// text as provenance.
    pub async fn translate_in_place(
        &self,
        tree: &mut DocumentTree,
        langs: &LanguagePair,
        cancel: &CancellationToken,
    ) -> TranslationReport {
        let start = Instant::now();
        let units = collect_units(tree);
        info!(
            "Translating {} units of '{}' ({} → {}, {} in flight)",
            units.len(),
            tree.name,
            langs.source,
            langs.target,
            self.concurrency
        );

        // Scoped to this call: back-to-back files never share permits.
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let outcomes = join_all(
            units
                .iter()
                .map(|unit| self.run_unit(unit, langs, Arc::clone(&semaphore), cancel)),
        )
        .await;

        let mut report = TranslationReport {
            units: units.len(),
            ..Default::default()
        };
        // join_all yields in input order, so outcome i belongs to unit i.
        for (unit, outcome) in units.into_iter().zip(outcomes) {
            match outcome {
                UnitOutcome::Translated(text) => {
                    replace_leaf_text(tree, &unit.location, text);
                    report.translated += 1;
                }
                UnitOutcome::Skipped => report.skipped += 1,
                UnitOutcome::KeptOriginal(err) => {
                    warn!("{}", err);
                    report.kept_original += 1;
                    report.failures.push(err);
                }
                UnitOutcome::InlineError(text, err) => {
                    warn!("{}", err);
                    replace_leaf_text(tree, &unit.location, text);
                    report.inline_errors += 1;
                    report.failures.push(err);
                }
                UnitOutcome::Cancelled => report.cancelled += 1,
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Translation done: {}/{} translated, {} kept, {} errors, {} cancelled in {}ms",
            report.translated,
            report.units,
            report.kept_original,
            report.inline_errors,
            report.cancelled,
            report.duration_ms
        );
        report
    }

    async fn run_unit(
        &self,
        unit: &TranslationUnit,
        langs: &LanguagePair,
        semaphore: Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> UnitOutcome {
        if unit.text.trim().is_empty() {
            return UnitOutcome::Skipped;
        }

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return UnitOutcome::Cancelled,
            permit = semaphore.acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return UnitOutcome::Cancelled,
            },
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let wait = self.retry.backoff(attempt);
            if !wait.is_zero() {
                debug!("Unit {}: retry {} after {:?}", unit.index, attempt, wait);
                tokio::time::sleep(wait).await;
            }

            let call = self.service.translate(&unit.text, langs);
            let result = match tokio::time::timeout(self.call_timeout, call).await {
                Ok(r) => r,
                Err(_elapsed) => Err(TranslationError::Timeout),
            };

            let err = match result {
                Ok(text) => return UnitOutcome::Translated(text),
                Err(e) => e,
            };

            let retry = attempt < self.retry.max_attempts
                && self.retry.is_retryable(&err)
                && !cancel.is_cancelled();
            if retry {
                continue;
            }

            let failure = NodeError::TranslationFailed {
                index: unit.index,
                attempts: attempt,
                detail: err.to_string(),
            };
            return match err {
                TranslationError::Status { detail, .. } => {
                    UnitOutcome::InlineError(format!("Translation error: {detail}"), failure)
                }
                _ => UnitOutcome::KeptOriginal(failure),
            };
        }
    }
}
