//! Error types for workflow construction.

use std::fmt;

use thiserror::Error;

/// Result type for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// A single problem found while building a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowViolation {
    /// Two jobs declare the same output file.
    DuplicateOutput {
        file: String,
        first_job: String,
        second_job: String,
    },
    /// The dependency graph contains a cycle. Jobs are listed in
    /// producer-before-consumer order starting from the earliest inserted job.
    CyclicDependency { cycle: Vec<String> },
    /// An explicit dependency names a job that does not exist.
    UnknownJob { job: String, referenced_by: String },
    /// The embedded replica catalog has two entries for one (file, site) pair.
    DuplicateReplica { lfn: String, site: String },
}

impl fmt::Display for WorkflowViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateOutput {
                file,
                first_job,
                second_job,
            } => write!(
                f,
                "file '{file}' is declared as output by both '{first_job}' and '{second_job}'"
            ),
            Self::CyclicDependency { cycle } => {
                write!(f, "dependency cycle: {}", cycle.join(" -> "))?;
                if let Some(first) = cycle.first() {
                    write!(f, " -> {first}")?;
                }
                Ok(())
            }
            Self::UnknownJob { job, referenced_by } => {
                write!(f, "job '{referenced_by}' depends on unknown job '{job}'")
            }
            Self::DuplicateReplica { lfn, site } => write!(
                f,
                "file '{lfn}' has more than one embedded replica on site '{site}'"
            ),
        }
    }
}

/// Errors that can occur while building a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A job with this identifier was already added.
    #[error("job '{0}' is already defined")]
    DuplicateJob(String),

    /// The workflow failed validation. Every violation found is listed.
    #[error("workflow '{workflow}' is invalid with {} violation(s):{}", .violations.len(), render(.violations))]
    Invalid {
        workflow: String,
        violations: Vec<WorkflowViolation>,
    },
}

impl WorkflowError {
    /// Violations carried by an [`WorkflowError::Invalid`] error.
    pub fn violations(&self) -> &[WorkflowViolation] {
        match self {
            Self::Invalid { violations, .. } => violations,
            Self::DuplicateJob(_) => &[],
        }
    }

    /// The reported cycle, if the workflow is cyclic.
    pub fn cycle(&self) -> Option<&[String]> {
        self.violations().iter().find_map(|v| match v {
            WorkflowViolation::CyclicDependency { cycle } => Some(cycle.as_slice()),
            _ => None,
        })
    }
}

fn render(violations: &[WorkflowViolation]) -> String {
    violations.iter().map(|v| format!("\n  - {v}")).collect()
}
