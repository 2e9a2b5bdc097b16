//! Weft: declarative workflow planning and execution tracking.
//!
//! ```text
//! CatalogBuilder ─finalize─▶ Catalog ─┐
//!                                     ├─▶ Planner ─▶ ExecutionPlan ─▶ Tracker ─▶ RunState
//! WorkflowBuilder ──build──▶ Workflow ┘                                  │
//!                                                  analyze / restart ◀───┘
//! ```
//!
//! Each stage lives in its own crate and is re-exported here. [`Session`]
//! wires a planner and a tracker from one [`WeftConfig`].

pub mod error;
pub mod logging;
pub mod session;

pub use error::{Error, Result};
pub use session::Session;

pub use weft_catalog as catalog;
pub use weft_config as config;
pub use weft_planner as planner;
pub use weft_tracker as tracker;
pub use weft_workflow as workflow;

pub use weft_catalog::{
    Catalog, CatalogBuilder, CatalogError, Container, ContainerKind, Site, Transformation,
};
pub use weft_config::{WeftConfig, load_config};
pub use weft_planner::{ExecutionPlan, Planner, PlannerOptions, PlanningError};
pub use weft_tracker::{
    Diagnostic, ExecutionBackend, RunHandle, RunPhase, RunState, TaskStatus, Tracker,
    TrackerConfig,
};
pub use weft_workflow::{Job, Workflow, WorkflowBuilder, WorkflowError};
