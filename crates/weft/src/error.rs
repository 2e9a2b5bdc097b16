//! Top-level error type.

use thiserror::Error;

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Any error raised while planning or running a workflow.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] weft_config::ConfigError),

    #[error(transparent)]
    Catalog(#[from] weft_catalog::CatalogError),

    #[error(transparent)]
    Workflow(#[from] weft_workflow::WorkflowError),

    #[error(transparent)]
    Planning(#[from] weft_planner::PlanningError),

    #[error(transparent)]
    Tracker(#[from] weft_tracker::TrackerError),

    #[error(transparent)]
    Logging(#[from] crate::logging::LoggingError),
}
