//! Vision service clients: image in, markdown text out.
//!
//! Two implementations of [`VisionService`]:
//!
//! * [`OpenAiCompatVisionService`] talks to any OpenAI-compatible
//!   `/v1/chat/completions` endpoint (vLLM, llama.cpp server, LM Studio).
//! * [`LlmVisionService`] goes through an `edgequake-llm` provider, which
//!   covers hosted OpenAI, Anthropic, Gemini and Ollama with one trait.
//!
//! Neither client enforces the per-call budget. The enrichment stage wraps
//! every call in `tokio::time::timeout`, so the same deadline applies no
//! matter which backend is plugged in.

use crate::error::DocflowError;
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Why a vision call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VisionError {
    /// Unreachable, or answered with a non-success status. Fatal for the file.
    #[error("vision service unavailable: {0}")]
    Unavailable(String),
    /// The client's own transport deadline fired.
    #[error("vision call timed out")]
    Timeout,
    /// Answered, but not with anything usable. Degrades to empty text.
    #[error("malformed vision response: {0}")]
    Malformed(String),
}

/// Anything that can read text out of an image.
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn extract_text(&self, image: &EncodedImage, prompt: &str) -> Result<String, VisionError>;
}

// ── OpenAI-compatible HTTP ───────────────────────────────────────────────

/// Direct HTTP client for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatVisionService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl OpenAiCompatVisionService {
    /// `base_url` may be a bare host (`http://vlm:8000`), a `/v1` root, or
    /// the full `/v1/chat/completions` URL.
    pub fn new(base_url: &str, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: completions_endpoint(base_url),
            model: model.into(),
            api_key,
            temperature: 0.1,
            max_tokens: 8000,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn completions_endpoint(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let base = if base.starts_with("http://") || base.starts_with("https://") {
        base.to_string()
    } else {
        format!("http://{base}")
    };
    if base.ends_with("/chat/completions") {
        base
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl VisionService for OpenAiCompatVisionService {
    async fn extract_text(&self, image: &EncodedImage, prompt: &str) -> Result<String, VisionError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image.data_uri() } },
                ],
            }],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VisionError::Timeout
            } else {
                VisionError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VisionError::Unavailable(format!("HTTP {status}: {}", text.trim())));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| VisionError::Malformed(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| VisionError::Malformed("response has no choices".into()))?
            .message
            .content
            .unwrap_or_default();
        debug!("Vision answered {} chars", content.len());
        Ok(content)
    }
}

// ── edgequake-llm provider ───────────────────────────────────────────────

/// [`VisionService`] backed by any `edgequake-llm` provider.
pub struct LlmVisionService {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmVisionService {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(0.1),
                max_tokens: Some(4096),
                ..Default::default()
            },
        }
    }

    /// Instantiate a named provider (`openai`, `anthropic`, `ollama`, …).
    pub fn named(provider: &str, model: &str) -> Result<Self, DocflowError> {
        ProviderFactory::create_llm_provider(provider, model)
            .map(Self::new)
            .map_err(|e| DocflowError::ServiceUnavailable {
                service: format!("vision ({provider})"),
                detail: e.to_string(),
            })
    }

    /// Resolve a provider from the environment.
    ///
    /// 1. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
    /// 2. OpenAI when `OPENAI_API_KEY` is set, with `model` or `gpt-4.1-nano`
    /// 3. whatever `ProviderFactory::from_env` detects
    pub fn from_env(model: Option<&str>) -> Result<Self, DocflowError> {
        if let (Ok(prov), Ok(m)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !m.is_empty() {
                return Self::named(&prov, &m);
            }
        }

        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            return Self::named("openai", model.unwrap_or("gpt-4.1-nano"));
        }

        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| DocflowError::ServiceUnavailable {
                service: "vision (auto)".to_string(),
                detail: format!(
                    "No LLM provider could be auto-detected. Set OPENAI_API_KEY, \
                     ANTHROPIC_API_KEY or DOCFLOW_VISION_URL. Error: {e}"
                ),
            })?;
        Ok(Self::new(provider))
    }
}

#[async_trait]
impl VisionService for LlmVisionService {
    async fn extract_text(&self, image: &EncodedImage, prompt: &str) -> Result<String, VisionError> {
        let messages = vec![
            ChatMessage::system(prompt),
            ChatMessage::user_with_images(
                "",
                vec![ImageData::new(image.base64.clone(), image.mime.clone()).with_detail("high")],
            ),
        ];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| VisionError::Unavailable(e.to_string()))?;
        debug!(
            "Vision provider: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}
