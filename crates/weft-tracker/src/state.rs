//! Per-run task state and the events that change it.
//!
//! [`RunState`] is only ever modified through [`RunState::apply`], and every
//! applied event is appended to the run log. Replaying the log against the
//! plan therefore reproduces the state exactly.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weft_planner::ExecutionPlan;

/// Status of one concrete task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    FailedMissingInput,
    FailedNonzeroExit,
    FailedStaging,
    /// Backend communication failed after all retries.
    FailedBackendUnavailable,
    Abandoned,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::FailedMissingInput => Some(FailureKind::MissingInput),
            Self::FailedNonzeroExit => Some(FailureKind::NonzeroExit),
            Self::FailedStaging => Some(FailureKind::Staging),
            Self::FailedBackendUnavailable => Some(FailureKind::BackendUnavailable),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure_kind().is_some()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failure_kind() {
            Some(kind) => kind.fmt(f),
            None => f.write_str(match self {
                Self::Pending => "pending",
                Self::Running => "running",
                Self::Succeeded => "succeeded",
                _ => "abandoned",
            }),
        }
    }
}

/// Cause of a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    MissingInput,
    NonzeroExit,
    Staging,
    BackendUnavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingInput => "failed-missing-input",
            Self::NonzeroExit => "failed-nonzero-exit",
            Self::Staging => "failed-staging",
            Self::BackendUnavailable => "failed-backend-unavailable",
        })
    }
}

/// What the backend reported about a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// File that was missing or failed to transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub searched_sites: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Tracked state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskStatus,
    /// Number of submissions to the backend, across restarts.
    pub attempts: u32,
    pub backend_handle: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub detail: Option<FailureDetail>,
}

impl TaskRecord {
    fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            backend_handle: None,
            submitted_at: None,
            started_at: None,
            finished_at: None,
            exit_code: None,
            detail: None,
        }
    }
}

/// One entry of the persisted run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// The backend accepted the task; it is now running.
    Submitted {
        task_id: String,
        handle: String,
        at: DateTime<Utc>,
    },
    /// The backend reported progress or an outcome.
    Transition {
        task_id: String,
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<FailureDetail>,
        at: DateTime<Utc>,
    },
    /// The task goes back to pending for another attempt.
    Requeued {
        task_id: String,
        restart: u32,
        at: DateTime<Utc>,
    },
    /// Every pending task is abandoned.
    Abandoned { at: DateTime<Utc> },
    /// A restart began, possibly with a replacement plan.
    Restarted {
        restart: u32,
        plan_fingerprint: String,
        at: DateTime<Utc>,
    },
}

/// Overall progress of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Tasks are running or eligible to run.
    Running,
    Succeeded,
    /// Settled with at least one failed task.
    Failed,
    /// Settled after cancellation.
    Abandoned,
}

impl RunPhase {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        })
    }
}

/// Task counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
    /// Pending tasks that cannot run because an ancestor did not succeed.
    pub blocked: usize,
    /// Submissions beyond the first, summed over all tasks.
    pub retries: u32,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tasks: {} succeeded, {} failed, {} running, {} pending ({} blocked), {} abandoned, {} retries",
            self.total,
            self.succeeded,
            self.failed,
            self.running,
            self.pending,
            self.blocked,
            self.abandoned,
            self.retries
        )
    }
}

/// Status of every task in a run, in plan order.
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: String,
    pub workflow: String,
    pub plan_fingerprint: String,
    /// Number of restarts so far.
    pub restarts: u32,
    /// Set by cancellation, cleared by a restart.
    pub abandoned: bool,
    tasks: Vec<TaskRecord>,
    index: HashMap<String, usize>,
    parents: Vec<Vec<usize>>,
}

impl RunState {
    /// Fresh state with every task of `plan` pending.
    pub fn new(
        run_id: impl Into<String>,
        plan: &ExecutionPlan,
        plan_fingerprint: impl Into<String>,
    ) -> Self {
        let tasks: Vec<TaskRecord> = plan.tasks.iter().map(|t| TaskRecord::new(&t.id)).collect();
        let index: HashMap<String, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.task_id.clone(), i))
            .collect();
        let mut parents = vec![Vec::new(); tasks.len()];
        for edge in &plan.edges {
            if let (Some(&p), Some(&c)) = (index.get(&edge.parent), index.get(&edge.child)) {
                parents[c].push(p);
            }
        }

        Self {
            run_id: run_id.into(),
            workflow: plan.workflow.clone(),
            plan_fingerprint: plan_fingerprint.into(),
            restarts: 0,
            abandoned: false,
            tasks,
            index,
            parents,
        }
    }

    /// Rebuild state from a plan and its full event log.
    pub fn replay<'a>(
        run_id: impl Into<String>,
        plan: &ExecutionPlan,
        plan_fingerprint: impl Into<String>,
        events: impl IntoIterator<Item = &'a RunEvent>,
    ) -> Self {
        let mut state = Self::new(run_id, plan, plan_fingerprint);
        for event in events {
            state.apply(event);
        }
        state
    }

    pub fn tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.index.get(task_id).map(|&i| &self.tasks[i])
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.task(task_id).map(|t| t.status)
    }

    /// Apply one event. Returns whether anything changed.
    ///
    /// A terminal status is never overwritten by a later transition; only
    /// [`RunEvent::Requeued`] moves a task out of a terminal status. Events
    /// naming unknown tasks are ignored.
    pub fn apply(&mut self, event: &RunEvent) -> bool {
        match event {
            RunEvent::Submitted {
                task_id,
                handle,
                at,
            } => {
                let Some(record) = self.record_mut(task_id) else {
                    return false;
                };
                if record.status != TaskStatus::Pending {
                    return false;
                }
                record.status = TaskStatus::Running;
                record.attempts += 1;
                record.backend_handle = Some(handle.clone());
                record.submitted_at = Some(*at);
                true
            }
            RunEvent::Transition {
                task_id,
                status,
                exit_code,
                detail,
                at,
            } => {
                let Some(record) = self.record_mut(task_id) else {
                    return false;
                };
                if record.status.is_terminal() {
                    return false;
                }
                match status {
                    TaskStatus::Pending => false,
                    TaskStatus::Running => {
                        if record.status != TaskStatus::Running || record.started_at.is_some() {
                            return false;
                        }
                        record.started_at = Some(*at);
                        true
                    }
                    terminal => {
                        record.status = *terminal;
                        record.exit_code = *exit_code;
                        record.detail = detail.clone();
                        record.finished_at = Some(*at);
                        true
                    }
                }
            }
            RunEvent::Requeued { task_id, .. } => {
                let Some(record) = self.record_mut(task_id) else {
                    return false;
                };
                if !record.status.is_terminal() {
                    return false;
                }
                record.status = TaskStatus::Pending;
                record.backend_handle = None;
                record.submitted_at = None;
                record.started_at = None;
                record.finished_at = None;
                record.exit_code = None;
                record.detail = None;
                true
            }
            RunEvent::Abandoned { at } => {
                let mut changed = !self.abandoned;
                self.abandoned = true;
                for record in &mut self.tasks {
                    if record.status == TaskStatus::Pending {
                        record.status = TaskStatus::Abandoned;
                        record.finished_at = Some(*at);
                        changed = true;
                    }
                }
                changed
            }
            RunEvent::Restarted {
                restart,
                plan_fingerprint,
                ..
            } => {
                if *restart <= self.restarts {
                    return false;
                }
                self.restarts = *restart;
                self.plan_fingerprint = plan_fingerprint.clone();
                self.abandoned = false;
                true
            }
        }
    }

    fn record_mut(&mut self, task_id: &str) -> Option<&mut TaskRecord> {
        self.index.get(task_id).map(|&i| &mut self.tasks[i])
    }

    /// Pending tasks whose parents have all succeeded, in plan order.
    pub fn ready_tasks(&self) -> Vec<&str> {
        if self.abandoned {
            return Vec::new();
        }
        self.tasks
            .iter()
            .enumerate()
            .filter(|(i, t)| {
                t.status == TaskStatus::Pending
                    && self.parents[*i]
                        .iter()
                        .all(|&p| self.tasks[p].status == TaskStatus::Succeeded)
            })
            .map(|(_, t)| t.task_id.as_str())
            .collect()
    }

    /// Running tasks with the backend handle they were submitted under.
    pub fn running_tasks(&self) -> Vec<(&str, &str)> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .filter_map(|t| {
                t.backend_handle
                    .as_deref()
                    .map(|h| (t.task_id.as_str(), h))
            })
            .collect()
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter().filter(|t| t.status.is_failure())
    }

    /// Pending tasks that can never become eligible without a restart,
    /// because some ancestor failed or was abandoned.
    pub fn blocked_tasks(&self) -> Vec<&str> {
        let blocked = self.blocked_mask();
        self.tasks
            .iter()
            .zip(blocked)
            .filter(|(_, b)| *b)
            .map(|(t, _)| t.task_id.as_str())
            .collect()
    }

    fn blocked_mask(&self) -> Vec<bool> {
        // plan order is topological, so parents are decided first
        let mut blocked = vec![false; self.tasks.len()];
        for (i, task) in self.tasks.iter().enumerate() {
            if task.status != TaskStatus::Pending {
                continue;
            }
            blocked[i] = self.parents[i].iter().any(|&p| {
                let status = self.tasks[p].status;
                status.is_failure() || status == TaskStatus::Abandoned || blocked[p]
            });
        }
        blocked
    }

    /// Overall phase. Settled once nothing runs and nothing is eligible.
    pub fn phase(&self) -> RunPhase {
        let running = self.tasks.iter().any(|t| t.status == TaskStatus::Running);
        if running || !self.ready_tasks().is_empty() {
            return RunPhase::Running;
        }
        if self.tasks.iter().all(|t| t.status == TaskStatus::Succeeded) {
            RunPhase::Succeeded
        } else if self.abandoned {
            RunPhase::Abandoned
        } else {
            RunPhase::Failed
        }
    }

    /// Task counts by status.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.tasks.len(),
            blocked: self.blocked_mask().into_iter().filter(|b| *b).count(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Succeeded => summary.succeeded += 1,
                TaskStatus::Abandoned => summary.abandoned += 1,
                _ => summary.failed += 1,
            }
            summary.retries += task.attempts.saturating_sub(1);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_planner::{ConcreteTask, PlanEdge, TaskKind};

    fn task(id: &str) -> ConcreteTask {
        ConcreteTask {
            id: id.to_string(),
            kind: TaskKind::Compute,
            job_id: Some(id.to_string()),
            site: "condorpool".to_string(),
            invocation: None,
            transfers: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            profiles: Default::default(),
        }
    }

    fn edge(parent: &str, child: &str) -> PlanEdge {
        PlanEdge {
            parent: parent.to_string(),
            child: child.to_string(),
        }
    }

    /// preprocess -> (left, right) -> analyze
    fn diamond() -> RunState {
        let plan = ExecutionPlan {
            workflow: "diamond".to_string(),
            execution_site: "condorpool".to_string(),
            staging_site: "local".to_string(),
            output_site: "local".to_string(),
            tasks: vec![task("preprocess"), task("left"), task("right"), task("analyze")],
            edges: vec![
                edge("preprocess", "left"),
                edge("preprocess", "right"),
                edge("left", "analyze"),
                edge("right", "analyze"),
            ],
        };
        RunState::new("diamond-1", &plan, "fp")
    }

    fn submitted(task_id: &str) -> RunEvent {
        RunEvent::Submitted {
            task_id: task_id.to_string(),
            handle: format!("h-{task_id}"),
            at: Utc::now(),
        }
    }

    fn finished(task_id: &str, status: TaskStatus) -> RunEvent {
        RunEvent::Transition {
            task_id: task_id.to_string(),
            status,
            exit_code: None,
            detail: None,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_ready_requires_all_parents_succeeded() {
        let mut state = diamond();
        assert_eq!(state.ready_tasks(), vec!["preprocess"]);

        state.apply(&submitted("preprocess"));
        assert!(state.ready_tasks().is_empty());
        state.apply(&finished("preprocess", TaskStatus::Succeeded));
        assert_eq!(state.ready_tasks(), vec!["left", "right"]);

        state.apply(&submitted("left"));
        state.apply(&finished("left", TaskStatus::Succeeded));
        assert!(state.ready_tasks().is_empty());
        assert_eq!(state.phase(), RunPhase::Running);

        state.apply(&submitted("right"));
        state.apply(&finished("right", TaskStatus::Succeeded));
        assert_eq!(state.ready_tasks(), vec!["analyze"]);
    }

    #[test]
    fn test_terminal_status_never_overwritten() {
        let mut state = diamond();
        state.apply(&submitted("preprocess"));
        assert!(state.apply(&finished("preprocess", TaskStatus::FailedNonzeroExit)));

        assert!(!state.apply(&finished("preprocess", TaskStatus::Succeeded)));
        assert!(!state.apply(&finished("preprocess", TaskStatus::Running)));
        assert!(!state.apply(&submitted("preprocess")));
        assert_eq!(state.status("preprocess"), Some(TaskStatus::FailedNonzeroExit));
    }

    #[test]
    fn test_unknown_task_ignored() {
        let mut state = diamond();
        assert!(!state.apply(&submitted("ghost")));
        assert!(!state.apply(&finished("ghost", TaskStatus::Succeeded)));
    }

    #[test]
    fn test_failure_blocks_dependents() {
        let mut state = diamond();
        state.apply(&submitted("preprocess"));
        state.apply(&finished("preprocess", TaskStatus::Succeeded));
        state.apply(&submitted("left"));
        state.apply(&submitted("right"));
        state.apply(&finished("left", TaskStatus::FailedMissingInput));
        assert_eq!(state.phase(), RunPhase::Running);

        state.apply(&finished("right", TaskStatus::Succeeded));
        assert_eq!(state.phase(), RunPhase::Failed);
        assert_eq!(state.blocked_tasks(), vec!["analyze"]);
        assert_eq!(state.status("analyze"), Some(TaskStatus::Pending));

        let summary = state.summary();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.blocked, 1);
    }

    #[test]
    fn test_requeue_resets_record() {
        let mut state = diamond();
        state.apply(&submitted("preprocess"));
        state.apply(&finished("preprocess", TaskStatus::FailedStaging));

        let requeue = RunEvent::Requeued {
            task_id: "preprocess".to_string(),
            restart: 1,
            at: Utc::now(),
        };
        assert!(state.apply(&requeue));
        assert!(!state.apply(&requeue));

        let record = state.task("preprocess").unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.attempts, 1);
        assert!(record.backend_handle.is_none());

        state.apply(&submitted("preprocess"));
        assert_eq!(state.task("preprocess").unwrap().attempts, 2);
        assert_eq!(state.summary().retries, 1);
    }

    #[test]
    fn test_abandon_and_restart() {
        let mut state = diamond();
        state.apply(&submitted("preprocess"));
        assert!(state.apply(&RunEvent::Abandoned { at: Utc::now() }));
        assert_eq!(state.status("left"), Some(TaskStatus::Abandoned));
        // running task keeps going until the backend confirms
        assert_eq!(state.phase(), RunPhase::Running);

        state.apply(&finished("preprocess", TaskStatus::Abandoned));
        assert_eq!(state.phase(), RunPhase::Abandoned);

        assert!(state.apply(&RunEvent::Restarted {
            restart: 1,
            plan_fingerprint: "fp".to_string(),
            at: Utc::now(),
        }));
        assert!(!state.abandoned);
        assert_eq!(state.restarts, 1);
    }

    #[test]
    fn test_replay_matches_live_state() {
        let events = vec![
            submitted("preprocess"),
            finished("preprocess", TaskStatus::Running),
            finished("preprocess", TaskStatus::Succeeded),
            submitted("left"),
            finished("left", TaskStatus::FailedNonzeroExit),
        ];
        let mut live = diamond();
        for event in &events {
            live.apply(event);
        }

        let json: Vec<String> = events
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect();
        let decoded: Vec<RunEvent> = json
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        let plan = ExecutionPlan {
            workflow: "diamond".to_string(),
            execution_site: "condorpool".to_string(),
            staging_site: "local".to_string(),
            output_site: "local".to_string(),
            tasks: vec![task("preprocess"), task("left"), task("right"), task("analyze")],
            edges: vec![
                edge("preprocess", "left"),
                edge("preprocess", "right"),
                edge("left", "analyze"),
                edge("right", "analyze"),
            ],
        };
        let replayed = RunState::replay("diamond-1", &plan, "fp", &decoded);
        assert_eq!(replayed.tasks(), live.tasks());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TaskStatus::FailedMissingInput.to_string(), "failed-missing-input");
        assert_eq!(TaskStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(
            serde_json::to_string(&TaskStatus::FailedBackendUnavailable).unwrap(),
            "\"failed-backend-unavailable\""
        );
    }
}
