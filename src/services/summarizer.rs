//! Summarization service client.

use crate::prompts::SUMMARY_FALLBACK;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummarizerError {
    #[error("summarizer unreachable: {0}")]
    Unavailable(String),
    #[error("summarizer answered HTTP {0}")]
    Status(u16),
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, SummarizerError>;
}

/// `POST {url}?text=…&summary_param=word&count=N`, answered by the summary
/// as the raw response body.
#[derive(Debug, Clone)]
pub struct HttpSummarizer {
    client: reqwest::Client,
    url: String,
    pub word_count: u32,
}

impl HttpSummarizer {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            word_count: 20,
        })
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, SummarizerError> {
        let count = self.word_count.to_string();
        let response = self
            .client
            .post(&self.url)
            .query(&[("text", text), ("summary_param", "word"), ("count", &count)])
            .send()
            .await
            .map_err(|e| SummarizerError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SummarizerError::Status(response.status().as_u16()));
        }
        response
            .text()
            .await
            .map_err(|e| SummarizerError::Unavailable(e.to_string()))
    }
}

/// Summarize `text`, never failing.
///
/// A missing summarizer yields an empty summary; an unreachable one yields
/// [`SUMMARY_FALLBACK`].
pub async fn summarize_or_fallback(summarizer: Option<&dyn Summarizer>, text: &str) -> String {
    let Some(s) = summarizer else {
        return String::new();
    };
    match s.summarize(text).await {
        Ok(summary) => summary.trim().to_string(),
        Err(e) => {
            warn!("Summary skipped: {}", e);
            SUMMARY_FALLBACK.to_string()
        }
    }
}
