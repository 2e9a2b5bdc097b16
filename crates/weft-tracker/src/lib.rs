//! Execution tracking for Weft.
//!
//! A [`Tracker`] takes an [`ExecutionPlan`](weft_planner::ExecutionPlan),
//! hands its tasks to an [`ExecutionBackend`] as their dependencies succeed,
//! and records every status change in a per-run event log:
//!
//! ```text
//! pending ──▶ running ──▶ succeeded
//!    │           ├──────▶ failed-missing-input
//!    │           ├──────▶ failed-nonzero-exit
//!    │           ├──────▶ failed-staging
//!    │           └──────▶ failed-backend-unavailable
//!    └──────────────────▶ abandoned   (cancel)
//! ```
//!
//! Failed runs are explained by [`analyze`] and resumed with
//! [`Tracker::restart`], which re-submits only the tasks that did not
//! succeed and everything downstream of them.

pub mod analyzer;
pub mod backend;
pub mod error;
pub mod log;
pub mod state;
pub mod tracker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use analyzer::{Diagnostic, analyze};
pub use backend::{BackendHandle, ExecutionBackend, StatusEvent, StatusEventKind, with_backoff};
pub use error::{BackendError, Result, TrackerError};
pub use log::RunLog;
pub use state::{
    FailureDetail, FailureKind, RunEvent, RunPhase, RunState, RunSummary, TaskRecord, TaskStatus,
};
pub use tracker::{Resubmission, RunHandle, Tracker, TrackerConfig};

#[cfg(any(test, feature = "testing"))]
pub use testing::{Outcome, ScriptedBackend};
