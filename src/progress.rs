//! Per-file task state machine.
//!
//! ```text
//! PENDING ──start──▶ PROCESSING ──complete──▶ READY
//!                        │
//!                        └──────fail────────▶ ERROR
//! ```
//!
//! No transition skips PROCESSING: failing a task that never started first
//! moves it to PROCESSING, so observers always see the full path. Within
//! PROCESSING the fraction only moves forward, at the [`Checkpoint`]s.
//!
//! Every transition is pushed to the [`TaskStore`] and to an optional
//! [`TaskObserver`]. Store failures are logged and otherwise ignored.

use crate::services::task_store::TaskStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Ready | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Ready => "READY",
            TaskStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Fraction done plus phase, as stored in the Task-Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub progress: f32,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    pub message: String,
}

/// One file's progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub progress: Progress,
    pub response_data: ResponseData,
}

impl Task {
    pub fn new(task_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            progress: Progress {
                progress: 0.0,
                status: TaskStatus::Pending,
            },
            response_data: ResponseData::default(),
        }
    }
}

/// Task-Store key: `user:service:task`.
pub fn task_key(user_id: &str, service_name: &str, task_id: &str) -> String {
    format!("{user_id}:{service_name}:{task_id}")
}

/// Pipeline points at which progress advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Checkpoint {
    /// File accepted into the session.
    Intake,
    /// Structural conversion finished.
    Converted,
    /// Enrichment finished (or skipped).
    Enriched,
    /// Exports rendered, about to store them.
    Finalizing,
}

impl Checkpoint {
    pub fn fraction(self) -> f32 {
        match self {
            Checkpoint::Intake => 0.1,
            Checkpoint::Converted => 0.33,
            Checkpoint::Enriched => 0.66,
            Checkpoint::Finalizing => 0.99,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("illegal transition {from} → {to}")]
    Illegal { from: TaskStatus, to: TaskStatus },
    #[error("progress may not go backwards ({from} → {to})")]
    Regression { from: f32, to: f32 },
}

/// Receives every task change. All methods default to no-ops.
pub trait TaskObserver: Send + Sync {
    fn on_transition(&self, task: &Task) {
        let _ = task;
    }

    fn on_message(&self, task: &Task, message: &str) {
        let _ = (task, message);
    }
}

pub struct NoopObserver;

impl TaskObserver for NoopObserver {}

/// Drives one [`Task`] through its lifecycle.
pub struct ProgressTracker {
    key: String,
    task: Task,
    store: Arc<dyn TaskStore>,
    observer: Arc<dyn TaskObserver>,
    history: Vec<Progress>,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("key", &self.key)
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// Create a PENDING task with a fresh id and register it with the store.
    pub async fn create(
        store: Arc<dyn TaskStore>,
        observer: Arc<dyn TaskObserver>,
        user_id: &str,
        service_name: &str,
    ) -> Self {
        let task = Task::new(uuid::Uuid::new_v4().to_string(), user_id);
        let key = task_key(user_id, service_name, &task.task_id);
        if let Err(e) = store.create_task(&key, &task).await {
            warn!("Task-Store create failed for {}: {}", key, e);
        }
        let history = vec![task.progress.clone()];
        observer.on_transition(&task);
        Self {
            key,
            task,
            store,
            observer,
            history,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn status(&self) -> TaskStatus {
        self.task.progress.status
    }

    pub fn fraction(&self) -> f32 {
        self.task.progress.progress
    }

    /// Every progress value this task has had, in order.
    pub fn history(&self) -> &[Progress] {
        &self.history
    }

    /// PENDING → PROCESSING at the intake checkpoint.
    pub async fn start(&mut self) -> Result<(), TransitionError> {
        self.expect(TaskStatus::Pending, TaskStatus::Processing)?;
        self.set(Checkpoint::Intake.fraction(), TaskStatus::Processing)
            .await;
        Ok(())
    }

    /// Move forward to `checkpoint`. Only valid while PROCESSING.
    pub async fn advance(&mut self, checkpoint: Checkpoint) -> Result<(), TransitionError> {
        self.expect(TaskStatus::Processing, TaskStatus::Processing)?;
        let to = checkpoint.fraction();
        if to < self.fraction() {
            return Err(TransitionError::Regression {
                from: self.fraction(),
                to,
            });
        }
        self.set(to, TaskStatus::Processing).await;
        Ok(())
    }

    /// Push a human-readable status message. Allowed in every state.
    pub async fn message(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!("{}: {}", self.key, message);
        self.task.response_data.message = message.clone();
        self.task.updated_at = Utc::now();
        if let Err(e) = self.store.update_status_message(&self.key, &message).await {
            warn!("Task-Store message failed for {}: {}", self.key, e);
        }
        self.observer.on_message(&self.task, &message);
    }

    /// PROCESSING → READY at 1.0.
    pub async fn complete(&mut self) -> Result<(), TransitionError> {
        self.expect(TaskStatus::Processing, TaskStatus::Ready)?;
        self.set(1.0, TaskStatus::Ready).await;
        Ok(())
    }

    /// → ERROR, keeping the fraction reached so far, with a message.
    ///
    /// A PENDING task passes through PROCESSING first.
    pub async fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        if self.status().is_terminal() {
            return Err(TransitionError::Illegal {
                from: self.status(),
                to: TaskStatus::Error,
            });
        }
        if self.status() == TaskStatus::Pending {
            self.set(0.0, TaskStatus::Processing).await;
        }
        self.message(message).await;
        let fraction = self.fraction();
        self.set(fraction, TaskStatus::Error).await;
        Ok(())
    }

    fn expect(&self, from: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
        if self.status() == from {
            Ok(())
        } else {
            Err(TransitionError::Illegal {
                from: self.status(),
                to,
            })
        }
    }

    async fn set(&mut self, fraction: f32, status: TaskStatus) {
        let progress = Progress {
            progress: fraction,
            status,
        };
        self.task.progress = progress.clone();
        self.task.updated_at = Utc::now();
        self.history.push(progress.clone());
        if let Err(e) = self.store.update_progress(&self.key, &progress).await {
            warn!("Task-Store progress update failed for {}: {}", self.key, e);
        }
        self.observer.on_transition(&self.task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::task_store::{InMemoryTaskStore, TaskStoreError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    async fn tracker() -> (ProgressTracker, Arc<InMemoryTaskStore>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let t = ProgressTracker::create(store.clone(), Arc::new(NoopObserver), "guest", "svc").await;
        (t, store)
    }

    fn fractions(h: &[Progress]) -> Vec<f32> {
        h.iter().map(|p| p.progress).collect()
    }

    #[tokio::test]
    async fn happy_path_hits_every_checkpoint() {
        let (mut t, store) = tracker().await;
        assert!(t.key().starts_with("guest:svc:"));
        t.start().await.unwrap();
        t.advance(Checkpoint::Converted).await.unwrap();
        t.advance(Checkpoint::Enriched).await.unwrap();
        t.advance(Checkpoint::Finalizing).await.unwrap();
        t.complete().await.unwrap();

        assert_eq!(fractions(t.history()), vec![0.0, 0.1, 0.33, 0.66, 0.99, 1.0]);
        assert_eq!(t.status(), TaskStatus::Ready);
        let pushed = store.progress_history(t.key());
        assert_eq!(fractions(&pushed), vec![0.1, 0.33, 0.66, 0.99, 1.0]);
        assert_eq!(store.get(t.key()).unwrap().progress.status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn cannot_skip_processing() {
        let (mut t, _) = tracker().await;
        assert!(matches!(
            t.complete().await,
            Err(TransitionError::Illegal {
                from: TaskStatus::Pending,
                to: TaskStatus::Ready
            })
        ));
        assert!(t.advance(Checkpoint::Converted).await.is_err());
        assert_eq!(t.history().len(), 1);
    }

    #[tokio::test]
    async fn progress_never_regresses() {
        let (mut t, _) = tracker().await;
        t.start().await.unwrap();
        t.advance(Checkpoint::Enriched).await.unwrap();
        let err = t.advance(Checkpoint::Converted).await.unwrap_err();
        assert!(matches!(err, TransitionError::Regression { .. }));
        assert_eq!(t.fraction(), 0.66);
    }

    #[tokio::test]
    async fn fail_from_pending_passes_through_processing() {
        let (mut t, store) = tracker().await;
        t.fail("unsupported format").await.unwrap();
        let statuses: Vec<TaskStatus> = t.history().iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Pending, TaskStatus::Processing, TaskStatus::Error]
        );
        let stored = store.get(t.key()).unwrap();
        assert_eq!(stored.response_data.message, "unsupported format");
    }

    #[tokio::test]
    async fn fail_keeps_fraction_and_is_terminal() {
        let (mut t, _) = tracker().await;
        t.start().await.unwrap();
        t.advance(Checkpoint::Converted).await.unwrap();
        t.fail("vision down").await.unwrap();
        assert_eq!(t.fraction(), 0.33);
        assert!(t.fail("again").await.is_err());
        assert!(t.complete().await.is_err());
        assert!(t.start().await.is_err());
    }

    struct BrokenStore;

    #[async_trait]
    impl TaskStore for BrokenStore {
        async fn create_task(&self, _: &str, _: &Task) -> Result<(), TaskStoreError> {
            Err(TaskStoreError::Unavailable("down".into()))
        }
        async fn update_progress(&self, _: &str, _: &Progress) -> Result<(), TaskStoreError> {
            Err(TaskStoreError::Unavailable("down".into()))
        }
        async fn update_status_message(&self, _: &str, _: &str) -> Result<(), TaskStoreError> {
            Err(TaskStoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn store_failures_do_not_escalate() {
        let mut t =
            ProgressTracker::create(Arc::new(BrokenStore), Arc::new(NoopObserver), "u", "s").await;
        t.start().await.unwrap();
        t.message("still going").await;
        t.complete().await.unwrap();
        assert_eq!(t.status(), TaskStatus::Ready);
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<(TaskStatus, f32)>>);

    impl TaskObserver for Recording {
        fn on_transition(&self, task: &Task) {
            self.0
                .lock()
                .unwrap()
                .push((task.progress.status, task.progress.progress));
        }
    }

    #[tokio::test]
    async fn observer_sees_no_pending_after_processing() {
        let obs = Arc::new(Recording::default());
        let mut t = ProgressTracker::create(
            Arc::new(InMemoryTaskStore::new()),
            obs.clone(),
            "u",
            "s",
        )
        .await;
        t.start().await.unwrap();
        t.complete().await.unwrap();

        let seen = obs.0.lock().unwrap().clone();
        let first_processing = seen
            .iter()
            .position(|(s, _)| *s == TaskStatus::Processing)
            .unwrap();
        assert!(seen[first_processing..]
            .iter()
            .all(|(s, _)| *s != TaskStatus::Pending));
        assert_eq!(seen.last(), Some(&(TaskStatus::Ready, 1.0)));
    }

    #[test]
    fn status_serialises_upper_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"PROCESSING\""
        );
    }
}
