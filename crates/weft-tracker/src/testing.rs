//! Scripted backend for tests.
//!
//! Every task succeeds unless an [`Outcome`] was scripted for it. Outcomes
//! queued with [`ScriptedBackend::with_outcome`] are consumed one per
//! submission; the last one sticks.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use weft_planner::ConcreteTask;

use crate::backend::{BackendHandle, ExecutionBackend, StatusEvent, StatusEventKind};
use crate::error::BackendError;

/// What a scripted task does once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Exit {
        code: i32,
        stderr_tail: Option<String>,
    },
    MissingInput {
        file: String,
        searched_sites: Vec<String>,
    },
    StagingFailure {
        file: String,
        reason: String,
    },
    /// Starts and never finishes.
    Hang,
}

impl Outcome {
    fn events(&self) -> Vec<StatusEventKind> {
        let terminal = match self {
            Self::Succeed => StatusEventKind::Exited {
                code: 0,
                stderr_tail: None,
            },
            Self::Exit { code, stderr_tail } => StatusEventKind::Exited {
                code: *code,
                stderr_tail: stderr_tail.clone(),
            },
            Self::MissingInput {
                file,
                searched_sites,
            } => StatusEventKind::MissingInput {
                file: file.clone(),
                searched_sites: searched_sites.clone(),
            },
            Self::StagingFailure { file, reason } => StatusEventKind::StagingFailed {
                file: file.clone(),
                reason: reason.clone(),
            },
            Self::Hang => return vec![StatusEventKind::Started],
        };
        vec![StatusEventKind::Started, terminal]
    }
}

#[derive(Debug)]
struct Submitted {
    task_id: String,
    outcome: Outcome,
    polled: bool,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct Script {
    outcomes: HashMap<String, VecDeque<Outcome>>,
    submissions: Vec<String>,
    handles: HashMap<String, Submitted>,
    cancelled: Vec<String>,
    failing_polls: u32,
    failing_submissions: u32,
    duplicate_events: bool,
}

/// In-memory [`ExecutionBackend`] driven by per-task outcomes.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next submission of `task_id`.
    pub fn with_outcome(self, task_id: impl Into<String>, outcome: Outcome) -> Self {
        self.script
            .lock()
            .outcomes
            .entry(task_id.into())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Replace every queued outcome for `task_id`.
    pub fn set_outcome(&self, task_id: impl Into<String>, outcome: Outcome) {
        self.script
            .lock()
            .outcomes
            .insert(task_id.into(), VecDeque::from([outcome]));
    }

    /// Give every outstanding submission of `task_id` a new outcome, to be
    /// reported on the next poll. Finishes tasks scripted to hang.
    pub fn complete(&self, task_id: &str, outcome: Outcome) {
        let mut script = self.script.lock();
        for submitted in script.handles.values_mut() {
            if submitted.task_id == task_id && !submitted.cancelled {
                submitted.outcome = outcome.clone();
                submitted.polled = false;
            }
        }
    }

    /// Fail the next `n` status polls as unavailable.
    pub fn fail_next_polls(&self, n: u32) {
        self.script.lock().failing_polls = n;
    }

    /// Fail the next `n` submissions as unavailable.
    pub fn fail_next_submissions(&self, n: u32) {
        self.script.lock().failing_submissions = n;
    }

    /// Deliver every event twice.
    pub fn with_duplicate_events(self) -> Self {
        self.script.lock().duplicate_events = true;
        self
    }

    /// Task ids in submission order.
    pub fn submissions(&self) -> Vec<String> {
        self.script.lock().submissions.clone()
    }

    pub fn submission_count(&self, task_id: &str) -> usize {
        self.script
            .lock()
            .submissions
            .iter()
            .filter(|id| *id == task_id)
            .count()
    }

    /// Task ids that received a cancel request.
    pub fn cancelled(&self) -> Vec<String> {
        self.script.lock().cancelled.clone()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit_task(&self, task: &ConcreteTask) -> Result<BackendHandle, BackendError> {
        let mut script = self.script.lock();
        if script.failing_submissions > 0 {
            script.failing_submissions -= 1;
            return Err(BackendError::Unavailable("scripted outage".into()));
        }

        let outcome = match script.outcomes.get_mut(&task.id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Outcome::Succeed),
            Some(queue) => queue.front().cloned().unwrap_or(Outcome::Succeed),
            None => Outcome::Succeed,
        };

        script.submissions.push(task.id.clone());
        let handle = format!("scripted-{}", script.submissions.len());
        script.handles.insert(
            handle.clone(),
            Submitted {
                task_id: task.id.clone(),
                outcome,
                polled: false,
                cancelled: false,
            },
        );
        Ok(BackendHandle::new(handle))
    }

    async fn status_events(
        &self,
        handle: &BackendHandle,
    ) -> Result<Vec<StatusEvent>, BackendError> {
        let mut script = self.script.lock();
        if script.failing_polls > 0 {
            script.failing_polls -= 1;
            return Err(BackendError::Unavailable("scripted outage".into()));
        }
        let duplicate = script.duplicate_events;

        let submitted = script
            .handles
            .get_mut(handle.as_str())
            .ok_or_else(|| BackendError::UnknownHandle(handle.to_string()))?;

        let kinds = if submitted.cancelled {
            vec![StatusEventKind::Cancelled]
        } else if !submitted.polled || duplicate {
            submitted.outcome.events()
        } else {
            Vec::new()
        };
        submitted.polled = true;

        let mut events: Vec<StatusEvent> = kinds.into_iter().map(StatusEvent::now).collect();
        if duplicate {
            let again = events.clone();
            events.extend(again);
        }
        Ok(events)
    }

    async fn cancel_task(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        let mut script = self.script.lock();
        let submitted = script
            .handles
            .get_mut(handle.as_str())
            .ok_or_else(|| BackendError::UnknownHandle(handle.to_string()))?;
        submitted.cancelled = true;
        let task_id = submitted.task_id.clone();
        script.cancelled.push(task_id);
        Ok(())
    }
}
