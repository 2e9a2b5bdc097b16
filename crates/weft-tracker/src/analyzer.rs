//! Failure analysis over a run's state.

use std::fmt;

use serde::{Deserialize, Serialize};
use weft_planner::{ConcreteTask, ExecutionPlan, TransferKind};

use crate::state::{FailureDetail, FailureKind, RunState, TaskRecord, TaskStatus};

/// One failed task, explained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub task_id: String,
    /// Abstract job the task was planned from, if any.
    pub job_id: Option<String>,
    pub kind: FailureKind,
    pub message: String,
    pub exit_code: Option<i32>,
    /// Pending descendants that cannot run until this task succeeds.
    pub blocked_dependents: Vec<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Explain every failed task of a run, in plan order.
pub fn analyze(plan: &ExecutionPlan, state: &RunState) -> Vec<Diagnostic> {
    state
        .failed_tasks()
        .filter_map(|record| {
            let kind = record.status.failure_kind()?;
            let task = plan.task(&record.task_id);
            let blocked_dependents = blocked_dependents(plan, state, &record.task_id);

            let mut message = describe(kind, record, task);
            if !blocked_dependents.is_empty() {
                message.push_str(&format!(
                    "; {} dependent task(s) blocked",
                    blocked_dependents.len()
                ));
            }

            Some(Diagnostic {
                task_id: record.task_id.clone(),
                job_id: task.and_then(|t| t.job_id.clone()),
                kind,
                message,
                exit_code: record.exit_code,
                blocked_dependents,
            })
        })
        .collect()
}

fn blocked_dependents(plan: &ExecutionPlan, state: &RunState, task_id: &str) -> Vec<String> {
    let reachable = plan.with_descendants([task_id]);
    plan.tasks
        .iter()
        .filter(|t| t.id != task_id && reachable.contains(&t.id))
        .filter(|t| state.status(&t.id) == Some(TaskStatus::Pending))
        .map(|t| t.id.clone())
        .collect()
}

fn describe(kind: FailureKind, record: &TaskRecord, task: Option<&ConcreteTask>) -> String {
    let id = &record.task_id;
    let empty = FailureDetail::default();
    let detail = record.detail.as_ref().unwrap_or(&empty);

    match kind {
        FailureKind::MissingInput => match &detail.file {
            Some(file) if detail.searched_sites.is_empty() => {
                format!("task '{id}' could not find input '{file}'")
            }
            Some(file) => format!(
                "task '{id}' could not find input '{file}' (searched sites: {})",
                detail.searched_sites.join(", ")
            ),
            None => {
                let expected: Vec<&str> = task
                    .map(|t| {
                        t.transfers
                            .iter()
                            .filter(|x| x.kind == TransferKind::Input)
                            .map(|x| x.lfn.as_str())
                            .collect()
                    })
                    .unwrap_or_default();
                if expected.is_empty() {
                    format!("task '{id}' is missing an input")
                } else {
                    format!(
                        "task '{id}' is missing an input (expected: {})",
                        expected.join(", ")
                    )
                }
            }
        },
        FailureKind::NonzeroExit => {
            let code = record
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            match detail.stderr_tail.as_deref().map(str::trim) {
                Some(tail) if !tail.is_empty() => {
                    format!("task '{id}' exited with code {code}: {tail}")
                }
                _ => format!("task '{id}' exited with code {code}"),
            }
        }
        FailureKind::Staging => {
            let file = detail.file.as_deref().unwrap_or("<unknown>");
            let reason = detail.reason.as_deref().unwrap_or("transfer failed");
            let transfer =
                task.and_then(|t| t.transfers.iter().find(|x| Some(&x.lfn) == detail.file.as_ref()));
            match transfer {
                Some(x) => format!(
                    "task '{id}' failed to transfer '{file}' from {} to {}: {reason}",
                    x.source_url, x.dest_url
                ),
                None => format!("task '{id}' failed to transfer '{file}': {reason}"),
            }
        }
        FailureKind::BackendUnavailable => match &detail.reason {
            Some(reason) => format!("task '{id}' lost contact with the execution backend: {reason}"),
            None => format!("task '{id}' lost contact with the execution backend"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use weft_planner::{PlanEdge, TaskKind, Transfer};

    use crate::state::RunEvent;

    fn task(id: &str, kind: TaskKind) -> ConcreteTask {
        ConcreteTask {
            id: id.to_string(),
            kind,
            job_id: Some(id.trim_start_matches("stage_in_").to_string()),
            site: "condorpool".to_string(),
            invocation: None,
            transfers: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            profiles: Default::default(),
        }
    }

    fn plan() -> ExecutionPlan {
        let mut stage_in = task("stage_in_preprocess", TaskKind::StageIn);
        stage_in.transfers.push(Transfer {
            lfn: "f.a".to_string(),
            kind: TransferKind::Input,
            source_site: Some("local".to_string()),
            source_url: "file:///data/f.a".to_string(),
            dest_site: "condorpool".to_string(),
            dest_url: "file:///home/wf/scratch/diamond/f.a".to_string(),
            register_replica: false,
        });
        ExecutionPlan {
            workflow: "diamond".to_string(),
            execution_site: "condorpool".to_string(),
            staging_site: "local".to_string(),
            output_site: "local".to_string(),
            tasks: vec![
                stage_in,
                task("preprocess", TaskKind::Compute),
                task("analyze", TaskKind::Compute),
            ],
            edges: vec![
                PlanEdge {
                    parent: "stage_in_preprocess".to_string(),
                    child: "preprocess".to_string(),
                },
                PlanEdge {
                    parent: "preprocess".to_string(),
                    child: "analyze".to_string(),
                },
            ],
        }
    }

    fn fail(
        state: &mut RunState,
        task_id: &str,
        status: TaskStatus,
        exit: Option<i32>,
        detail: FailureDetail,
    ) {
        state.apply(&RunEvent::Submitted {
            task_id: task_id.to_string(),
            handle: "h".to_string(),
            at: Utc::now(),
        });
        state.apply(&RunEvent::Transition {
            task_id: task_id.to_string(),
            status,
            exit_code: exit,
            detail: Some(detail),
            at: Utc::now(),
        });
    }

    #[test]
    fn test_missing_input_names_file_and_sites() {
        let plan = plan();
        let mut state = RunState::new("r", &plan, "fp");
        fail(
            &mut state,
            "stage_in_preprocess",
            TaskStatus::FailedMissingInput,
            None,
            FailureDetail {
                file: Some("f.a".to_string()),
                searched_sites: vec!["condorpool".to_string(), "local".to_string()],
                ..Default::default()
            },
        );

        let diagnostics = analyze(&plan, &state);
        assert_eq!(diagnostics.len(), 1);
        let d = &diagnostics[0];
        assert_eq!(d.kind, FailureKind::MissingInput);
        assert_eq!(d.job_id.as_deref(), Some("preprocess"));
        assert_eq!(d.blocked_dependents, vec!["preprocess", "analyze"]);
        assert!(d.message.contains("'f.a'"));
        assert!(d.message.contains("searched sites: condorpool, local"));
        assert!(d.message.ends_with("2 dependent task(s) blocked"));
    }

    #[test]
    fn test_missing_input_falls_back_to_planned_transfers() {
        let plan = plan();
        let mut state = RunState::new("r", &plan, "fp");
        fail(
            &mut state,
            "stage_in_preprocess",
            TaskStatus::FailedMissingInput,
            None,
            FailureDetail::default(),
        );

        let d = &analyze(&plan, &state)[0];
        assert!(d.message.contains("expected: f.a"), "{}", d.message);
    }

    #[test]
    fn test_nonzero_exit_reports_code_and_stderr() {
        let plan = plan();
        let mut state = RunState::new("r", &plan, "fp");
        for id in ["stage_in_preprocess", "preprocess"] {
            state.apply(&RunEvent::Submitted {
                task_id: id.to_string(),
                handle: "h".to_string(),
                at: Utc::now(),
            });
            state.apply(&RunEvent::Transition {
                task_id: id.to_string(),
                status: TaskStatus::Succeeded,
                exit_code: Some(0),
                detail: None,
                at: Utc::now(),
            });
        }
        fail(
            &mut state,
            "analyze",
            TaskStatus::FailedNonzeroExit,
            Some(3),
            FailureDetail {
                stderr_tail: Some("segfault\n".to_string()),
                ..Default::default()
            },
        );

        let diagnostics = analyze(&plan, &state);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].exit_code, Some(3));
        assert_eq!(diagnostics[0].message, "task 'analyze' exited with code 3: segfault");
        assert!(diagnostics[0].blocked_dependents.is_empty());
    }

    #[test]
    fn test_staging_failure_names_urls() {
        let plan = plan();
        let mut state = RunState::new("r", &plan, "fp");
        fail(
            &mut state,
            "stage_in_preprocess",
            TaskStatus::FailedStaging,
            None,
            FailureDetail {
                file: Some("f.a".to_string()),
                reason: Some("permission denied".to_string()),
                ..Default::default()
            },
        );

        let d = &analyze(&plan, &state)[0];
        assert!(d.message.contains("from file:///data/f.a to file:///home/wf/scratch/diamond/f.a"));
        assert!(d.message.contains("permission denied"));
    }

    #[test]
    fn test_no_failures_no_diagnostics() {
        let plan = plan();
        let state = RunState::new("r", &plan, "fp");
        assert!(analyze(&plan, &state).is_empty());
    }
}
