//! Deferred task queue.
//!
//! Work that should not run inside the request (subscriber fan-out, intent
//! detection, origin-trial follow-up) is handed to a task handler by path.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::TaskError;

pub const DETECT_INTENT: &str = "/tasks/detect-intent";
pub const EMAIL_SUBSCRIBERS: &str = "/tasks/email-subscribers";
pub const EMAIL_REVIEWERS: &str = "/tasks/email-reviewers";
pub const OT_CREATION_APPROVED: &str = "/tasks/email-ot-creation-request-approved";
pub const OT_EXTENSION_APPROVED: &str = "/tasks/email-ot-extension-approved";

/// Something that accepts deferred tasks.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue `payload` for the handler at `path`.
    async fn enqueue(&self, path: &str, payload: Value) -> Result<(), TaskError>;
}

/// Serialize `payload` and enqueue it.
pub async fn enqueue_json<T: Serialize + ?Sized>(
    queue: &dyn TaskQueue,
    path: &str,
    payload: &T,
) -> Result<(), TaskError> {
    let value = serde_json::to_value(payload)?;
    queue.enqueue(path, value).await
}

/// POSTs each task to `<base_url><path>` in the background.
///
/// Delivery failures are logged, never reported to the caller.
pub struct HttpTaskQueue {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTaskQueue {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn task_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl TaskQueue for HttpTaskQueue {
    async fn enqueue(&self, path: &str, payload: Value) -> Result<(), TaskError> {
        if !path.starts_with('/') {
            return Err(TaskError::EnqueueFailed {
                path: path.to_string(),
                reason: "task path must start with '/'".into(),
            });
        }

        let url = self.task_url(path);
        let client = self.client.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(path = %path, "Task delivered");
                }
                Ok(resp) => {
                    tracing::warn!(path = %path, status = %resp.status(), "Task handler rejected task");
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Task delivery failed");
                }
            }
        });
        Ok(())
    }
}

/// Logs tasks instead of delivering them. Used when no handler is configured.
pub struct LoggingTaskQueue;

#[async_trait]
impl TaskQueue for LoggingTaskQueue {
    async fn enqueue(&self, path: &str, payload: Value) -> Result<(), TaskError> {
        tracing::info!(path = %path, payload = %payload, "Task enqueued (no handler configured)");
        Ok(())
    }
}

/// A task captured by [`MemoryTaskQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueuedTask {
    pub path: String,
    pub payload: Value,
}

/// Keeps every task in memory, in order.
#[derive(Default)]
pub struct MemoryTaskQueue {
    tasks: Mutex<Vec<EnqueuedTask>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything enqueued so far.
    pub fn tasks(&self) -> Vec<EnqueuedTask> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Tasks enqueued for one path.
    pub fn tasks_for(&self, path: &str) -> Vec<EnqueuedTask> {
        self.tasks()
            .into_iter()
            .filter(|t| t.path == path)
            .collect()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, path: &str, payload: Value) -> Result<(), TaskError> {
        let mut tasks = self.tasks.lock().map_err(|e| TaskError::EnqueueFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        tasks.push(EnqueuedTask {
            path: path.to_string(),
            payload,
        });
        Ok(())
    }
}
