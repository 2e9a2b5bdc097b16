//! Execution backend abstraction.
//!
//! The tracker never runs tasks itself; it hands each
//! [`ConcreteTask`](weft_planner::ConcreteTask) to an [`ExecutionBackend`]
//! and polls it for status events.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weft_planner::ConcreteTask;

use crate::error::BackendError;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque handle the backend returns for a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendHandle(pub String);

impl BackendHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Something the backend observed about a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusEventKind {
    Started,
    /// The process exited. Code 0 is success.
    Exited {
        code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr_tail: Option<String>,
    },
    /// An input was not present where the plan said it would be.
    MissingInput {
        file: String,
        searched_sites: Vec<String>,
    },
    /// A transfer into or out of the task failed.
    StagingFailed { file: String, reason: String },
    /// The backend stopped the task on request.
    Cancelled,
}

/// A timestamped status event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(flatten)]
    pub kind: StatusEventKind,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn now(kind: StatusEventKind) -> Self {
        Self {
            kind,
            at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A system that can run concrete tasks (a batch scheduler, a local process
/// pool, a test double).
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Submit a task for execution.
    async fn submit_task(&self, task: &ConcreteTask) -> Result<BackendHandle, BackendError>;

    /// Events observed for `handle` since the previous call.
    ///
    /// Backends may deliver an event more than once; the tracker ignores
    /// anything that arrives after a task reached a terminal status.
    async fn status_events(&self, handle: &BackendHandle)
    -> Result<Vec<StatusEvent>, BackendError>;

    /// Ask the backend to stop a task. Best effort.
    async fn cancel_task(&self, handle: &BackendHandle) -> Result<(), BackendError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry
// ─────────────────────────────────────────────────────────────────────────────

/// Run `f`, retrying transient backend errors with exponential backoff.
///
/// Non-transient errors are returned immediately. After `max_retries`
/// retries the last error is returned.
pub async fn with_backoff<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    backend_name: &str,
    mut f: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BackendError>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() || attempt >= max_retries => return Err(e),
            Err(_) => {
                attempt += 1;
                tracing::warn!(
                    backend = backend_name,
                    attempt = attempt,
                    max_retries = max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Backend call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_backoff_recovers_from_transient_errors() {
        let calls = &AtomicU32::new(0);
        let result = with_backoff(3, Duration::from_millis(100), "test", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(BackendError::Unavailable("down".into()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(2, Duration::from_millis(10), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Unavailable("down".into()))
        })
        .await;

        assert_eq!(result, Err(BackendError::Unavailable("down".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_backoff_does_not_retry_rejection() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(5, Duration::from_millis(10), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Rejected("bad task".into()))
        })
        .await;

        assert!(matches!(result, Err(BackendError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_event_json() {
        let event = StatusEvent::now(StatusEventKind::Exited {
            code: 2,
            stderr_tail: Some("boom".into()),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "exited");
        assert_eq!(json["code"], 2);
        let back: StatusEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
