//! Planner: expands an abstract [`Workflow`](weft_workflow::Workflow) into a
//! concrete [`ExecutionPlan`] using a finalized
//! [`Catalog`](weft_catalog::Catalog).
//!
//! For every job the planner binds an executable (staging it when it is only
//! available elsewhere), resolves each input either to an upstream job or to
//! a replica, and inserts synthetic tasks around the compute task:
//!
//! ```text
//! pull_<container> ──┐   (once per container per plan)
//! stage_in_<job> ────┼──▶ <job> ──▶ stage_out_<job>
//! <parent job> ──────┘
//! ```
//!
//! Planning is a pure function of the workflow, the catalog and the
//! [`PlannerOptions`]: identical inputs yield byte-identical
//! [`ExecutionPlan::to_json`] output.

pub mod error;
pub mod plan;
pub mod planner;

pub use error::{PlanViolation, PlanningError, Result};
pub use plan::{
    ConcreteTask, ContainerBinding, ExecutionPlan, FileBinding, Invocation, PlanDefect, PlanDiff,
    PlanEdge, TaskKind, Transfer, TransferKind, is_valid_workflow_name,
};
pub use planner::{Planner, PlannerOptions};
