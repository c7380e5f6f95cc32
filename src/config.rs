//! Configuration types for the document pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built through
//! [`PipelineConfigBuilder`]. Remote endpoints are kept apart in
//! [`ServiceEndpoints`] because they come from the environment, while the
//! pipeline config is usually fixed in code.

use crate::error::DocflowError;
use crate::pipeline::export::ImageMode;
use crate::prompts::DELAY_PLACEHOLDER;
use crate::services::translator::TranslationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for processing documents.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_docflow::{FailurePolicy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .translation_concurrency(8)
///     .vision_timeout_secs(30)
///     .failure_policy(FailurePolicy::ContinueOnError)
///     .build()
///     .unwrap();
/// assert_eq!(config.translation_concurrency, 8);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Budget for one vision call, per picture or table. Default: 25.
    ///
    /// Exceeding it inserts [`PipelineConfig::delay_placeholder`] instead of
    /// failing the file. There is no retry inside the stage.
    pub vision_timeout_secs: u64,

    /// Prompt override for the vision service. `None` uses
    /// [`crate::prompts::VISION_PROMPT`].
    pub vision_prompt: Option<String>,

    /// Text spliced in when a vision call times out.
    pub delay_placeholder: String,

    /// Maximum in-flight translation calls per file. Default: 5.
    pub translation_concurrency: usize,

    /// Budget for one translation call in seconds. Default: 60.
    pub translation_call_timeout_secs: u64,

    /// Retry policy for translation calls.
    pub translation_retry: RetryPolicy,

    /// Translate the tree in place instead of producing a copy. Default: false.
    pub translate_in_place: bool,

    /// Number of blocking conversion workers per session. Default: 2.
    pub conversion_workers: usize,

    /// Scale factor handed to the structural extractor for page images. Default: 2.0.
    pub images_scale: f32,

    /// Longest edge of an image sent to the vision service. Default: 2000.
    pub max_rendered_pixels: u32,

    /// How pictures appear in markdown exports. Default: placeholder.
    pub image_mode: ImageMode,

    /// What a session does after one file fails. Default: fail-fast.
    pub failure_policy: FailurePolicy,

    /// `true`: a conversion error fails the file. `false`: the extractor's
    /// best-effort (possibly empty) tree is used instead. Default: true.
    pub raises_on_error: bool,

    /// Middle segment of task keys (`user:service:task`). Default: "docflow".
    pub service_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vision_timeout_secs: 25,
            vision_prompt: None,
            delay_placeholder: DELAY_PLACEHOLDER.to_string(),
            translation_concurrency: 5,
            translation_call_timeout_secs: 60,
            translation_retry: RetryPolicy::default(),
            translate_in_place: false,
            conversion_workers: 2,
            images_scale: 2.0,
            max_rendered_pixels: 2000,
            image_mode: ImageMode::default(),
            failure_policy: FailurePolicy::default(),
            raises_on_error: true,
            service_name: "docflow".to_string(),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("vision_timeout_secs", &self.vision_timeout_secs)
            .field("vision_prompt", &self.vision_prompt.as_ref().map(|_| "<custom>"))
            .field("translation_concurrency", &self.translation_concurrency)
            .field("translation_call_timeout_secs", &self.translation_call_timeout_secs)
            .field("translation_retry", &self.translation_retry)
            .field("translate_in_place", &self.translate_in_place)
            .field("conversion_workers", &self.conversion_workers)
            .field("images_scale", &self.images_scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("image_mode", &self.image_mode)
            .field("failure_policy", &self.failure_policy)
            .field("raises_on_error", &self.raises_on_error)
            .field("service_name", &self.service_name)
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn vision_timeout(&self) -> Duration {
        Duration::from_secs(self.vision_timeout_secs)
    }

    pub fn translation_call_timeout(&self) -> Duration {
        Duration::from_secs(self.translation_call_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn vision_timeout_secs(mut self, secs: u64) -> Self {
        self.config.vision_timeout_secs = secs.max(1);
        self
    }

    pub fn vision_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.vision_prompt = Some(prompt.into());
        self
    }

    pub fn delay_placeholder(mut self, text: impl Into<String>) -> Self {
        self.config.delay_placeholder = text.into();
        self
    }

    pub fn translation_concurrency(mut self, n: usize) -> Self {
        self.config.translation_concurrency = n.max(1);
        self
    }

    pub fn translation_call_timeout_secs(mut self, secs: u64) -> Self {
        self.config.translation_call_timeout_secs = secs.max(1);
        self
    }

    pub fn translation_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.translation_retry = policy;
        self
    }

    pub fn translate_in_place(mut self, v: bool) -> Self {
        self.config.translate_in_place = v;
        self
    }

    pub fn conversion_workers(mut self, n: usize) -> Self {
        self.config.conversion_workers = n.max(1);
        self
    }

    pub fn images_scale(mut self, scale: f32) -> Self {
        self.config.images_scale = scale.clamp(0.5, 4.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn image_mode(mut self, mode: ImageMode) -> Self {
        self.config.image_mode = mode;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn raises_on_error(mut self, v: bool) -> Self {
        self.config.raises_on_error = v;
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DocflowError> {
        let c = &self.config;
        if c.translation_concurrency == 0 {
            return Err(DocflowError::InvalidConfig(
                "Translation concurrency must be ≥ 1".into(),
            ));
        }
        if c.translation_retry.max_attempts == 0 {
            return Err(DocflowError::InvalidConfig(
                "Retry policy needs at least one attempt".into(),
            ));
        }
        if c.service_name.trim().is_empty() || c.service_name.contains(':') {
            return Err(DocflowError::InvalidConfig(format!(
                "Service name must be non-empty and free of ':', got '{}'",
                c.service_name
            )));
        }
        Ok(self.config)
    }
}

// ── Policies ─────────────────────────────────────────────────────────────

/// Predicate deciding whether a failed translation call is retried.
pub type RetryPredicate = Arc<dyn Fn(&TranslationError) -> bool + Send + Sync>;

/// How translation calls are retried.
///
/// Waits `backoff_ms * 2^(attempt-1)` between attempts: with the defaults
/// 250 ms then 500 ms, three attempts in total.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first. Default: 3.
    pub max_attempts: u32,
    /// Base delay for exponential backoff. Default: 250.
    pub backoff_ms: u64,
    retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 250,
            retryable: Arc::new(TranslationError::is_timeout),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff_ms", &self.backoff_ms)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_ms,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, 0)
    }

    /// Replace the retryable-fault predicate (timeouts only by default).
    pub fn retry_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&TranslationError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(f);
        self
    }

    pub fn is_retryable(&self, err: &TranslationError) -> bool {
        (self.retryable)(err)
    }

    /// Delay before attempt `attempt` (1-based; the first attempt never waits).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 2)))
    }
}

/// What a multi-file session does when one file fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the session; remaining files are not attempted. (default)
    #[default]
    FailFast,
    /// Report the failure and move on to the next file.
    ContinueOnError,
}

// ── Endpoints ────────────────────────────────────────────────────────────

/// Base URLs and credentials of the remote collaborators.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub vision_url: Option<String>,
    pub vision_model: Option<String>,
    pub vision_api_key: Option<String>,
    pub translator_url: Option<String>,
    pub task_store_url: Option<String>,
    pub summarizer_url: Option<String>,
}

impl fmt::Debug for ServiceEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpoints")
            .field("vision_url", &self.vision_url)
            .field("vision_model", &self.vision_model)
            .field("vision_api_key", &self.vision_api_key.as_ref().map(|_| "<redacted>"))
            .field("translator_url", &self.translator_url)
            .field("task_store_url", &self.task_store_url)
            .field("summarizer_url", &self.summarizer_url)
            .finish()
    }
}

impl ServiceEndpoints {
    /// Read every `DOCFLOW_*` endpoint variable. Empty values count as unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            vision_url: get("DOCFLOW_VISION_URL"),
            vision_model: get("DOCFLOW_VISION_MODEL"),
            vision_api_key: get("DOCFLOW_VISION_API_KEY"),
            translator_url: get("DOCFLOW_TRANSLATOR_URL"),
            task_store_url: get("DOCFLOW_TASK_STORE_URL"),
            summarizer_url: get("DOCFLOW_SUMMARIZER_URL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.vision_timeout_secs, 25);
        assert_eq!(c.translation_concurrency, 5);
        assert_eq!(c.conversion_workers, 2);
        assert_eq!(c.translation_retry.max_attempts, 3);
        assert_eq!(c.failure_policy, FailurePolicy::FailFast);
        assert!(c.raises_on_error);
        assert!(!c.translate_in_place);
    }

    #[test]
    fn builder_clamps() {
        let c = PipelineConfig::builder()
            .translation_concurrency(0)
            .conversion_workers(0)
            .images_scale(100.0)
            .build()
            .unwrap();
        assert_eq!(c.translation_concurrency, 1);
        assert_eq!(c.conversion_workers, 1);
        assert_eq!(c.images_scale, 4.0);
    }

    #[test]
    fn builder_rejects_bad_service_name() {
        let err = PipelineConfig::builder()
            .service_name("a:b")
            .build()
            .unwrap_err();
        assert!(matches!(err, DocflowError::InvalidConfig(_)));
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy::new(4, 100);
        assert_eq!(p.backoff(1), Duration::ZERO);
        assert_eq!(p.backoff(2), Duration::from_millis(100));
        assert_eq!(p.backoff(3), Duration::from_millis(200));
        assert_eq!(p.backoff(4), Duration::from_millis(400));
    }

    #[test]
    fn default_predicate_retries_timeouts_only() {
        let p = RetryPolicy::default();
        assert!(p.is_retryable(&TranslationError::Timeout));
        assert!(!p.is_retryable(&TranslationError::Unavailable("down".into())));

        let p = p.retry_if(|_| true);
        assert!(p.is_retryable(&TranslationError::Unavailable("down".into())));
    }

    #[test]
    fn endpoints_ignore_empty_values() {
        let env: HashMap<&str, &str> = [
            ("DOCFLOW_TRANSLATOR_URL", "http://translator"),
            ("DOCFLOW_VISION_URL", "  "),
        ]
        .into_iter()
        .collect();
        let e = ServiceEndpoints::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(e.translator_url.as_deref(), Some("http://translator"));
        assert_eq!(e.vision_url, None);
        assert_eq!(e.task_store_url, None);
    }

    #[test]
    fn debug_redacts_api_key() {
        let e = ServiceEndpoints {
            vision_api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        assert!(!format!("{e:?}").contains("sk-secret"));
    }
}
