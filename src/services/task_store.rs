//! Task-Store clients: where task progress is persisted for other readers.
//!
//! The pipeline never depends on the store succeeding. Every call made by
//! [`crate::progress::ProgressTracker`] logs failures and moves on.

use crate::progress::{Progress, Task};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskStoreError {
    #[error("task store unreachable: {0}")]
    Unavailable(String),
    #[error("task store answered HTTP {0}")]
    Status(u16),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, key: &str, task: &Task) -> Result<(), TaskStoreError>;
    async fn update_progress(&self, key: &str, progress: &Progress) -> Result<(), TaskStoreError>;
    async fn update_status_message(&self, key: &str, message: &str) -> Result<(), TaskStoreError>;
}

// ── HTTP ─────────────────────────────────────────────────────────────────

/// HTTP Task-Store: `POST /storage/task`, `PATCH /storage/update_progress`,
/// `PATCH /storage/update_response_data`.
#[derive(Debug, Clone)]
pub struct HttpTaskStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTaskStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), TaskStoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| TaskStoreError::Unavailable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TaskStoreError::Status(response.status().as_u16()))
        }
    }
}

#[async_trait]
impl TaskStore for HttpTaskStore {
    async fn create_task(&self, key: &str, task: &Task) -> Result<(), TaskStoreError> {
        let url = format!("{}/storage/task", self.base_url);
        self.send(self.client.post(url).json(&json!({ "key": key, "task": task })))
            .await
    }

    async fn update_progress(&self, key: &str, progress: &Progress) -> Result<(), TaskStoreError> {
        let url = format!("{}/storage/update_progress", self.base_url);
        self.send(
            self.client
                .patch(url)
                .json(&json!({ "key": key, "progress": progress })),
        )
        .await
    }

    async fn update_status_message(&self, key: &str, message: &str) -> Result<(), TaskStoreError> {
        let url = format!("{}/storage/update_response_data", self.base_url);
        self.send(
            self.client
                .patch(url)
                .json(&json!({ "key": key, "response_data": message })),
        )
        .await
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Store that keeps tasks in a map and records every progress update.
///
/// Used by the CLI when no Task-Store URL is configured, and by tests to
/// observe the exact sequence of transitions.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<String, Task>>,
    history: Mutex<Vec<(String, Progress)>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Task> {
        self.tasks.lock().ok()?.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .tasks
            .lock()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Every progress update pushed for `key`, in order.
    pub fn progress_history(&self, key: &str) -> Vec<Progress> {
        self.history
            .lock()
            .map(|h| {
                h.iter()
                    .filter(|(k, _)| k == key)
                    .map(|(_, p)| p.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, key: &str, task: &Task) -> Result<(), TaskStoreError> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| TaskStoreError::Unavailable("poisoned".into()))?;
        tasks.insert(key.to_string(), task.clone());
        Ok(())
    }

    async fn update_progress(&self, key: &str, progress: &Progress) -> Result<(), TaskStoreError> {
        {
            let mut tasks = self
                .tasks
                .lock()
                .map_err(|_| TaskStoreError::Unavailable("poisoned".into()))?;
            let task = tasks.get_mut(key).ok_or(TaskStoreError::Status(404))?;
            task.progress = progress.clone();
            task.updated_at = chrono::Utc::now();
        }
        if let Ok(mut h) = self.history.lock() {
            h.push((key.to_string(), progress.clone()));
        }
        Ok(())
    }

    async fn update_status_message(&self, key: &str, message: &str) -> Result<(), TaskStoreError> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| TaskStoreError::Unavailable("poisoned".into()))?;
        let task = tasks.get_mut(key).ok_or(TaskStoreError::Status(404))?;
        task.response_data.message = message.to_string();
        task.updated_at = chrono::Utc::now();
        Ok(())
    }
}
