//! Planning errors.

use std::fmt;

use thiserror::Error;

/// Result type for planning.
pub type Result<T> = std::result::Result<T, PlanningError>;

/// A single reason a workflow could not be planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanViolation {
    /// An input has no producing job and no replica on any allowed site.
    UnresolvedInput {
        job: String,
        file: String,
        searched_sites: Vec<String>,
    },
    /// A job references a transformation with no catalog entry at all.
    UnknownTransformation { job: String, transformation: String },
    /// Entries exist, but none is installed on or stageable to the site.
    NoTransformationForSite {
        job: String,
        transformation: String,
        site: String,
    },
    /// A site named in the planner options is not in the catalog.
    UnknownSite { site: String, role: String },
    /// The staging site has no shared scratch directory.
    NoScratchDirectory { site: String },
    /// Outputs must be staged out but the output site has no storage directory.
    NoStorageDirectory { site: String },
    /// A generated task id collides with a job id or another generated id.
    DuplicateTaskId { task: String },
    /// The workflow name is not usable as a directory name.
    InvalidWorkflowName { workflow: String },
}

impl fmt::Display for PlanViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedInput {
                job,
                file,
                searched_sites,
            } => write!(
                f,
                "input '{file}' of job '{job}' is not produced by any job and has no replica on site(s) [{}]",
                searched_sites.join(", ")
            ),
            Self::UnknownTransformation {
                job,
                transformation,
            } => write!(
                f,
                "job '{job}' uses transformation '{transformation}' which is not in the catalog"
            ),
            Self::NoTransformationForSite {
                job,
                transformation,
                site,
            } => write!(
                f,
                "job '{job}': transformation '{transformation}' is neither installed on nor stageable to site '{site}'"
            ),
            Self::UnknownSite { site, role } => {
                write!(f, "{role} site '{site}' is not in the catalog")
            }
            Self::NoScratchDirectory { site } => {
                write!(f, "staging site '{site}' has no shared-scratch directory")
            }
            Self::NoStorageDirectory { site } => {
                write!(f, "output site '{site}' has no local-storage directory")
            }
            Self::DuplicateTaskId { task } => {
                write!(f, "task id '{task}' is generated more than once")
            }
            Self::InvalidWorkflowName { workflow } => {
                write!(f, "workflow name '{workflow}' must be a single path component")
            }
        }
    }
}

/// Planning failed. Every violation found is listed.
#[derive(Debug, Error)]
#[error("planning workflow '{workflow}' failed with {} violation(s):{}", .violations.len(), render(.violations))]
pub struct PlanningError {
    pub workflow: String,
    pub violations: Vec<PlanViolation>,
}

impl PlanningError {
    /// Files reported as unresolved, in report order.
    pub fn unresolved_inputs(&self) -> Vec<&str> {
        self.violations
            .iter()
            .filter_map(|v| match v {
                PlanViolation::UnresolvedInput { file, .. } => Some(file.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn render(violations: &[PlanViolation]) -> String {
    violations.iter().map(|v| format!("\n  - {v}")).collect()
}
