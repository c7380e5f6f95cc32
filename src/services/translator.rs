//! Translation service client.
//!
//! Wire contract: `POST {url}` with `{"text", "source_language",
//! "target_language"}`, answered by `{"text"}`. A non-2xx status is not an
//! exception: it comes back as [`TranslationError::Status`], which the
//! translation stage turns into inline `Translation error: …` text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Source and target language codes, e.g. `ru` → `en`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Why a single translation call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    /// The call exceeded its time budget.
    #[error("translation timed out")]
    Timeout,
    /// Connection refused, DNS failure, reset.
    #[error("translator unreachable: {0}")]
    Unavailable(String),
    /// The service answered with a non-success status.
    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },
    /// The body was not the expected `{"text": …}`.
    #[error("malformed translator response: {0}")]
    Malformed(String),
}

impl TranslationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TranslationError::Timeout)
    }
}

/// Anything that can translate one string.
#[async_trait]
pub trait TranslationService: Send + Sync {
    async fn translate(&self, text: &str, langs: &LanguagePair) -> Result<String, TranslationError>;
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    source_language: &'a str,
    target_language: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    text: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "message", alias = "error")]
    detail: serde_json::Value,
}

/// [`TranslationService`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTranslator {
    client: reqwest::Client,
    url: String,
}

impl HttpTranslator {
    /// `timeout` bounds the whole request; it surfaces as [`TranslationError::Timeout`].
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TranslationService for HttpTranslator {
    async fn translate(&self, text: &str, langs: &LanguagePair) -> Result<String, TranslationError> {
        let body = TranslateRequest {
            text,
            source_language: &langs.source,
            target_language: &langs.target,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<ErrorBody>(&raw) {
                Ok(ErrorBody {
                    detail: serde_json::Value::String(s),
                }) => s,
                Ok(ErrorBody { detail }) => detail.to_string(),
                Err(_) if raw.trim().is_empty() => status.to_string(),
                Err(_) => raw.trim().to_string(),
            };
            debug!("Translator answered {}: {}", status, detail);
            return Err(TranslationError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let parsed: TranslateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                TranslationError::Timeout
            } else {
                TranslationError::Malformed(e.to_string())
            }
        })?;
        Ok(parsed.text)
    }
}

fn classify(e: reqwest::Error) -> TranslationError {
    if e.is_timeout() {
        TranslationError::Timeout
    } else {
        TranslationError::Unavailable(e.to_string())
    }
}
