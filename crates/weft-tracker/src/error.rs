//! Error types for run tracking.

use thiserror::Error;
use weft_planner::PlanDefect;

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors reported by an [`ExecutionBackend`](crate::ExecutionBackend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not be reached. Retried with backoff.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the task.
    #[error("task rejected by backend: {0}")]
    Rejected(String),

    /// The backend does not know the handle.
    #[error("unknown task handle '{0}'")]
    UnknownHandle(String),
}

impl BackendError {
    /// Whether the operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors that can occur while tracking runs.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// No run with this identifier is known or persisted.
    #[error("unknown run '{0}'")]
    UnknownRun(String),

    /// The operation needs a settled run.
    #[error("run '{0}' still has running or eligible tasks")]
    RunActive(String),

    /// A replacement plan belongs to a different workflow.
    #[error("plan for workflow '{found}' cannot replace a plan for workflow '{expected}'")]
    PlanMismatch { expected: String, found: String },

    /// The plan cannot be driven as given.
    #[error("plan for workflow '{workflow}' is malformed: {}", render(.defects))]
    InvalidPlan {
        workflow: String,
        defects: Vec<PlanDefect>,
    },

    /// A run id that cannot name a directory under the runs directory.
    #[error("invalid run id '{0}'")]
    InvalidRunId(String),

    /// `wait` gave up before the run settled.
    #[error("timed out waiting for run '{0}'")]
    Timeout(String),

    /// Run directory I/O failed.
    #[error("run log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Run log (de)serialization failed.
    #[error("run log serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn render(defects: &[PlanDefect]) -> String {
    defects
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
