//! Run submission, monitoring, cancellation and restart.
//!
//! Each run owns one driver task. The driver keeps the ready queue: it
//! submits every pending task whose dependencies have succeeded, polls the
//! backend for running tasks, and records each resulting transition in the
//! run log before exposing it to callers. Callers observe progress through
//! [`Tracker::poll`] snapshots or by suspending in [`Tracker::wait`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use weft_config::TrackerSection;
use weft_planner::ExecutionPlan;

use crate::analyzer::{Diagnostic, analyze};
use crate::backend::{BackendHandle, ExecutionBackend, StatusEvent, StatusEventKind, with_backoff};
use crate::error::{Result, TrackerError};
use crate::log::RunLog;
use crate::state::{FailureDetail, RunEvent, RunPhase, RunState, TaskStatus};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tracker tuning.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Interval between backend status polls.
    pub poll_interval: Duration,
    /// Maximum number of tasks running at once.
    pub max_concurrent_tasks: usize,
    /// Retries for transient backend errors.
    pub backend_retries: u32,
    /// Initial backoff between backend retries.
    pub backend_backoff: Duration,
    /// Automatic resubmissions of a task that exited non-zero.
    pub task_retries: u32,
    /// Directory holding one subdirectory per run.
    pub runs_dir: PathBuf,
}

impl From<&TrackerSection> for TrackerConfig {
    fn from(section: &TrackerSection) -> Self {
        Self {
            poll_interval: Duration::from_millis(section.poll_interval_ms),
            max_concurrent_tasks: section.max_concurrent_tasks.max(1),
            backend_retries: section.backend_retries,
            backend_backoff: Duration::from_millis(section.backend_backoff_ms),
            task_retries: section.task_retries,
            runs_dir: section.runs_dir.clone(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::from(&TrackerSection::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handles
// ─────────────────────────────────────────────────────────────────────────────

/// Identifies a run. `restart` counts restarts performed when the handle was
/// issued; every handle for the same run id addresses the same run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
    pub restart: u32,
}

/// Result of a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resubmission {
    pub handle: RunHandle,
    /// Tasks queued to run again, in plan order. Empty when every task had
    /// already succeeded.
    pub tasks: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Run
// ─────────────────────────────────────────────────────────────────────────────

struct Run {
    run_id: String,
    plan: RwLock<Arc<ExecutionPlan>>,
    state: Mutex<RunState>,
    updates: watch::Sender<RunPhase>,
    log: RunLog,
    /// Serializes restarts of this run.
    restart_lock: tokio::sync::Mutex<()>,
    wake: Notify,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Run {
    fn new(plan: ExecutionPlan, state: RunState, log: RunLog) -> Self {
        let (updates, _) = watch::channel(state.phase());
        Self {
            run_id: state.run_id.clone(),
            plan: RwLock::new(Arc::new(plan)),
            state: Mutex::new(state),
            updates,
            log,
            restart_lock: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
            driver: Mutex::new(None),
        }
    }

    fn plan(&self) -> Arc<ExecutionPlan> {
        self.plan.read().clone()
    }

    fn handle(&self) -> RunHandle {
        RunHandle {
            run_id: self.run_id.clone(),
            restart: self.state.lock().restarts,
        }
    }

    /// Apply `event` and append it to the log. Events that change nothing
    /// are not logged.
    fn record(&self, event: RunEvent) -> Result<bool> {
        self.record_then(event, |_| None)
    }

    /// Like [`Run::record`], then apply the event `follow_up` derives from
    /// the updated state. Observers only see the state after both.
    fn record_then<F>(&self, event: RunEvent, follow_up: F) -> Result<bool>
    where
        F: FnOnce(&RunState) -> Option<RunEvent>,
    {
        let mut state = self.state.lock();
        if !state.apply(&event) {
            return Ok(false);
        }
        self.log.append(&event)?;
        if let Some(next) = follow_up(&*state) {
            if state.apply(&next) {
                self.log.append(&next)?;
            }
        }
        let phase = state.phase();
        drop(state);

        if let RunEvent::Transition {
            task_id, status, ..
        } = &event
        {
            debug!(run_id = %self.run_id, task_id = %task_id, status = %status, "Task transition");
        }
        self.updates.send_replace(phase);
        Ok(true)
    }

    fn record_or_log(&self, event: RunEvent) -> bool {
        self.record_then_or_log(event, |_| None)
    }

    fn record_then_or_log<F>(&self, event: RunEvent, follow_up: F) -> bool
    where
        F: FnOnce(&RunState) -> Option<RunEvent>,
    {
        match self.record_then(event, follow_up) {
            Ok(changed) => changed,
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "Failed to record run event");
                false
            }
        }
    }

    fn is_running(&self, task_id: &str) -> bool {
        self.state.lock().status(task_id) == Some(TaskStatus::Running)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracker
// ─────────────────────────────────────────────────────────────────────────────

/// Reject plans whose task graph the driver cannot index.
fn check_plan(plan: &ExecutionPlan) -> Result<()> {
    let defects = plan.defects();
    if defects.is_empty() {
        Ok(())
    } else {
        Err(TrackerError::InvalidPlan {
            workflow: plan.workflow.clone(),
            defects,
        })
    }
}

/// Submits plans to an [`ExecutionBackend`] and tracks their runs.
pub struct Tracker {
    backend: Arc<dyn ExecutionBackend>,
    config: TrackerConfig,
    runs: RwLock<HashMap<String, Arc<Run>>>,
    shutdown: CancellationToken,
}

impl Tracker {
    pub fn new(backend: Arc<dyn ExecutionBackend>, config: TrackerConfig) -> Self {
        Self {
            backend,
            config,
            runs: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Identifiers of the runs this tracker drives.
    pub fn runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Persist `plan` as a new run and start driving it.
    pub async fn submit(&self, plan: ExecutionPlan) -> Result<RunHandle> {
        check_plan(&plan)?;
        let run_id = format!("{}-{}", plan.workflow, &Uuid::new_v4().simple().to_string()[..8]);
        let fingerprint = plan.fingerprint()?;
        let log = RunLog::create(&self.config.runs_dir, &run_id, &plan)?;
        let state = RunState::new(&run_id, &plan, fingerprint);

        info!(
            run_id = %run_id,
            workflow = %plan.workflow,
            tasks = plan.len(),
            "Run submitted"
        );

        let run = Arc::new(Run::new(plan, state, log));
        self.runs.write().insert(run_id.clone(), Arc::clone(&run));
        self.spawn_driver(&run);

        Ok(RunHandle { run_id, restart: 0 })
    }

    /// Resume a persisted run, e.g. after a process restart. Running tasks
    /// are polled again through their recorded backend handles.
    pub async fn attach(&self, run_id: &str) -> Result<RunHandle> {
        if let Some(run) = self.runs.read().get(run_id) {
            return Ok(run.handle());
        }

        let (log, plan, events) = RunLog::open(&self.config.runs_dir, run_id)?;
        check_plan(&plan)?;
        let fingerprint = plan.fingerprint()?;
        let state = RunState::replay(run_id, &plan, fingerprint, &events);
        info!(
            run_id,
            events = events.len(),
            phase = %state.phase(),
            "Run attached"
        );

        let run = Arc::new(Run::new(plan, state, log));
        let handle = run.handle();
        self.runs
            .write()
            .insert(run_id.to_string(), Arc::clone(&run));
        self.spawn_driver(&run);
        Ok(handle)
    }

    /// Snapshot of the run's current state.
    pub fn poll(&self, handle: &RunHandle) -> Result<RunState> {
        Ok(self.run(handle)?.state.lock().clone())
    }

    /// The plan the run currently executes.
    pub fn plan(&self, handle: &RunHandle) -> Result<Arc<ExecutionPlan>> {
        Ok(self.run(handle)?.plan())
    }

    /// Suspend until the run settles, or until `timeout` elapses.
    pub async fn wait(&self, handle: &RunHandle, timeout: Option<Duration>) -> Result<RunState> {
        let run = self.run(handle)?;
        let mut updates = run.updates.subscribe();
        let settled = async move {
            loop {
                if updates.borrow_and_update().is_settled() {
                    break;
                }
                if updates.changed().await.is_err() {
                    break;
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, settled)
                .await
                .map_err(|_| TrackerError::Timeout(handle.run_id.clone()))?,
            None => settled.await,
        }
        self.poll(handle)
    }

    /// Abandon every pending task and ask the backend to stop running ones.
    ///
    /// Running tasks keep their status until the backend confirms they
    /// stopped.
    pub async fn cancel(&self, handle: &RunHandle) -> Result<()> {
        let run = self.run(handle)?;
        run.record(RunEvent::Abandoned { at: Utc::now() })?;

        let running: Vec<(String, String)> = run
            .state
            .lock()
            .running_tasks()
            .into_iter()
            .map(|(task, h)| (task.to_string(), h.to_string()))
            .collect();
        for (task_id, backend_handle) in running {
            if let Err(e) = self
                .backend
                .cancel_task(&BackendHandle::new(backend_handle))
                .await
            {
                warn!(run_id = %run.run_id, task_id = %task_id, error = %e, "Cancel request failed");
            }
        }

        run.wake.notify_one();
        info!(run_id = %run.run_id, "Run cancelled");
        Ok(())
    }

    /// Explain the run's failed tasks.
    pub fn analyze(&self, handle: &RunHandle) -> Result<Vec<Diagnostic>> {
        let run = self.run(handle)?;
        let plan = run.plan();
        let state = run.state.lock();
        Ok(analyze(&plan, &state))
    }

    /// Re-run every task that has not succeeded, plus its descendants.
    /// Succeeded tasks are never resubmitted.
    pub async fn restart(&self, handle: &RunHandle) -> Result<Resubmission> {
        let run = self.run(handle)?;
        let _guard = run.restart_lock.lock().await;
        self.restart_locked(&run, None).await
    }

    /// Swap in a re-planned version of the run's workflow and restart.
    ///
    /// Tasks whose definition changed or that are new are re-run along with
    /// everything that has not succeeded and all their descendants.
    pub async fn restart_with_plan(
        &self,
        handle: &RunHandle,
        plan: ExecutionPlan,
    ) -> Result<Resubmission> {
        let run = self.run(handle)?;
        let _guard = run.restart_lock.lock().await;
        self.restart_locked(&run, Some(plan)).await
    }

    /// Stop every driver. Runs stay on disk and can be attached again.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let drivers: Vec<JoinHandle<()>> = self
            .runs
            .read()
            .values()
            .filter_map(|run| run.driver.lock().take())
            .collect();
        for driver in drivers {
            let _ = driver.await;
        }
        info!("Tracker shut down");
    }

    fn run(&self, handle: &RunHandle) -> Result<Arc<Run>> {
        self.runs
            .read()
            .get(&handle.run_id)
            .cloned()
            .ok_or_else(|| TrackerError::UnknownRun(handle.run_id.clone()))
    }

    async fn restart_locked(
        &self,
        run: &Arc<Run>,
        replacement: Option<ExecutionPlan>,
    ) -> Result<Resubmission> {
        if !run.state.lock().phase().is_settled() {
            return Err(TrackerError::RunActive(run.run_id.clone()));
        }

        let driver = run.driver.lock().take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }

        let current = run.plan();
        let (plan, changed) = match replacement {
            Some(next) => {
                if next.workflow != current.workflow {
                    return Err(TrackerError::PlanMismatch {
                        expected: current.workflow.clone(),
                        found: next.workflow,
                    });
                }
                check_plan(&next)?;
                let diff = current.diff(&next);
                let changed: Vec<String> = diff.changed.into_iter().chain(diff.added).collect();
                (Arc::new(next), changed)
            }
            None => (current, Vec::new()),
        };
        let fingerprint = plan.fingerprint()?;
        let replaced = fingerprint != run.state.lock().plan_fingerprint;

        if replaced {
            run.log.write_plan(&plan)?;
            // rebuild from the log so live state matches a later replay
            let events = run.log.read_events()?;
            let previous = run.state.lock().plan_fingerprint.clone();
            let state = RunState::replay(&run.run_id, &plan, previous, &events);
            *run.state.lock() = state;
            *run.plan.write() = Arc::clone(&plan);
        }

        let tasks: Vec<String> = {
            let state = run.state.lock();
            let roots = state
                .tasks()
                .iter()
                .filter(|t| t.status != TaskStatus::Succeeded)
                .map(|t| t.task_id.as_str())
                .chain(changed.iter().map(String::as_str));
            let rerun = plan.with_descendants(roots);
            plan.tasks
                .iter()
                .filter(|t| rerun.contains(&t.id))
                .map(|t| t.id.clone())
                .collect()
        };

        if tasks.is_empty() && !replaced {
            info!(run_id = %run.run_id, "Nothing to restart");
            return Ok(Resubmission {
                handle: run.handle(),
                tasks,
            });
        }

        let restart = run.state.lock().restarts + 1;
        let at = Utc::now();
        run.record(RunEvent::Restarted {
            restart,
            plan_fingerprint: fingerprint,
            at,
        })?;
        for task_id in &tasks {
            run.record(RunEvent::Requeued {
                task_id: task_id.clone(),
                restart,
                at,
            })?;
        }

        info!(
            run_id = %run.run_id,
            restart,
            tasks = tasks.len(),
            replaced_plan = replaced,
            "Run restarted"
        );
        self.spawn_driver(run);

        Ok(Resubmission {
            handle: RunHandle {
                run_id: run.run_id.clone(),
                restart,
            },
            tasks,
        })
    }

    fn spawn_driver(&self, run: &Arc<Run>) {
        let driver = Driver {
            run: Arc::clone(run),
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
        };
        *run.driver.lock() = Some(tokio::spawn(driver.drive()));
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

struct Driver {
    run: Arc<Run>,
    backend: Arc<dyn ExecutionBackend>,
    config: TrackerConfig,
    shutdown: CancellationToken,
}

impl Driver {
    async fn drive(self) {
        loop {
            self.dispatch_ready().await;

            let settled = {
                let state = self.run.state.lock();
                let phase = state.phase();
                phase.is_settled().then(|| (phase, state.summary()))
            };
            if let Some((phase, summary)) = settled {
                info!(
                    run_id = %self.run.run_id,
                    phase = %phase,
                    summary = %summary,
                    "Run settled"
                );
                break;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!(run_id = %self.run.run_id, "Driver stopped");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.run.wake.notified() => {}
            }

            self.poll_running().await;
        }
    }

    /// Submit eligible tasks up to the concurrency bound.
    async fn dispatch_ready(&self) {
        let (ready, running) = {
            let state = self.run.state.lock();
            let ready: Vec<String> = state.ready_tasks().into_iter().map(String::from).collect();
            (ready, state.running_tasks().len())
        };
        let slots = self.config.max_concurrent_tasks.saturating_sub(running);
        if ready.is_empty() || slots == 0 {
            return;
        }

        let plan = self.run.plan();
        for task_id in ready.into_iter().take(slots) {
            let Some(task) = plan.task(&task_id) else {
                continue;
            };

            let submitted = with_backoff(
                self.config.backend_retries,
                self.config.backend_backoff,
                self.backend.name(),
                || self.backend.submit_task(task),
            )
            .await;

            match submitted {
                Ok(handle) => {
                    let accepted = self.run.record_or_log(RunEvent::Submitted {
                        task_id: task_id.clone(),
                        handle: handle.to_string(),
                        at: Utc::now(),
                    });
                    if !accepted {
                        // cancelled while submitting
                        if let Err(e) = self.backend.cancel_task(&handle).await {
                            warn!(
                                run_id = %self.run.run_id,
                                task_id = %task_id,
                                handle = %handle,
                                error = %e,
                                "Failed to cancel orphaned submission"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        run_id = %self.run.run_id,
                        task_id = %task_id,
                        error = %e,
                        "Task submission failed"
                    );
                    self.run.record_or_log(RunEvent::Transition {
                        task_id,
                        status: TaskStatus::FailedBackendUnavailable,
                        exit_code: None,
                        detail: Some(FailureDetail {
                            reason: Some(e.to_string()),
                            ..Default::default()
                        }),
                        at: Utc::now(),
                    });
                }
            }
        }
    }

    /// Collect status events for every running task.
    async fn poll_running(&self) {
        let running: Vec<(String, BackendHandle)> = self
            .run
            .state
            .lock()
            .running_tasks()
            .into_iter()
            .map(|(task, h)| (task.to_string(), BackendHandle::new(h)))
            .collect();

        for (task_id, handle) in running {
            let polled = with_backoff(
                self.config.backend_retries,
                self.config.backend_backoff,
                self.backend.name(),
                || self.backend.status_events(&handle),
            )
            .await;

            match polled {
                Ok(events) => {
                    for event in events {
                        // anything after the first terminal event is stale
                        if !self.run.is_running(&task_id) {
                            break;
                        }
                        self.apply_status(&task_id, event);
                    }
                }
                Err(e) => {
                    warn!(
                        run_id = %self.run.run_id,
                        task_id = %task_id,
                        error = %e,
                        "Status poll failed"
                    );
                    self.run.record_or_log(RunEvent::Transition {
                        task_id,
                        status: TaskStatus::FailedBackendUnavailable,
                        exit_code: None,
                        detail: Some(FailureDetail {
                            reason: Some(e.to_string()),
                            ..Default::default()
                        }),
                        at: Utc::now(),
                    });
                }
            }
        }
    }

    fn apply_status(&self, task_id: &str, event: StatusEvent) {
        let (status, exit_code, detail) = match event.kind {
            StatusEventKind::Started => (TaskStatus::Running, None, None),
            StatusEventKind::Exited { code: 0, .. } => (TaskStatus::Succeeded, Some(0), None),
            StatusEventKind::Exited { code, stderr_tail } => (
                TaskStatus::FailedNonzeroExit,
                Some(code),
                Some(FailureDetail {
                    stderr_tail,
                    ..Default::default()
                }),
            ),
            StatusEventKind::MissingInput {
                file,
                searched_sites,
            } => (
                TaskStatus::FailedMissingInput,
                None,
                Some(FailureDetail {
                    file: Some(file),
                    searched_sites,
                    ..Default::default()
                }),
            ),
            StatusEventKind::StagingFailed { file, reason } => (
                TaskStatus::FailedStaging,
                None,
                Some(FailureDetail {
                    file: Some(file),
                    reason: Some(reason),
                    ..Default::default()
                }),
            ),
            StatusEventKind::Cancelled => (TaskStatus::Abandoned, None, None),
        };

        let transition = RunEvent::Transition {
            task_id: task_id.to_string(),
            status,
            exit_code,
            detail,
            at: event.at,
        };
        if status != TaskStatus::FailedNonzeroExit || self.config.task_retries == 0 {
            self.run.record_or_log(transition);
            return;
        }

        let task_retries = self.config.task_retries;
        let run_id = &self.run.run_id;
        self.run.record_then_or_log(transition, |state| {
            let attempts = state.task(task_id)?.attempts;
            if state.abandoned || attempts > task_retries {
                return None;
            }
            info!(
                run_id = %run_id,
                task_id,
                attempt = attempts,
                max_retries = task_retries,
                "Retrying failed task"
            );
            Some(RunEvent::Requeued {
                task_id: task_id.to_string(),
                restart: state.restarts,
                at: Utc::now(),
            })
        });
    }
}
