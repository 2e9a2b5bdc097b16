//! A planner and a tracker wired from one configuration.

use std::sync::Arc;

use tracing::info;
use weft_catalog::Catalog;
use weft_config::WeftConfig;
use weft_planner::{ExecutionPlan, Planner, PlannerOptions};
use weft_tracker::{
    Diagnostic, ExecutionBackend, Resubmission, RunHandle, RunState, Tracker, TrackerConfig,
};
use weft_workflow::Workflow;

use crate::error::Result;

/// Plans workflows against one catalog and runs them on one backend.
pub struct Session {
    planner: Planner,
    tracker: Tracker,
}

impl Session {
    pub fn new(
        catalog: Arc<Catalog>,
        backend: Arc<dyn ExecutionBackend>,
        config: &WeftConfig,
    ) -> Self {
        let planner = Planner::new(catalog).with_options(PlannerOptions::from(&config.planner()));
        let tracker = Tracker::new(backend, TrackerConfig::from(&config.tracker()));
        Self { planner, tracker }
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Plan `workflow` without running it.
    pub fn plan(&self, workflow: &Workflow) -> Result<ExecutionPlan> {
        Ok(self.planner.plan(workflow)?)
    }

    /// Plan `workflow` and submit the result.
    pub async fn run(&self, workflow: &Workflow) -> Result<RunHandle> {
        let plan = self.plan(workflow)?;
        Ok(self.tracker.submit(plan).await?)
    }

    /// Re-plan `workflow`, typically after the catalog was fixed, and
    /// restart the run with the new plan.
    pub async fn replan(&self, handle: &RunHandle, workflow: &Workflow) -> Result<Resubmission> {
        let plan = self.plan(workflow)?;
        let resubmission = self.tracker.restart_with_plan(handle, plan).await?;
        info!(
            run_id = %handle.run_id,
            tasks = resubmission.tasks.len(),
            "Workflow re-planned"
        );
        Ok(resubmission)
    }

    pub async fn wait(&self, handle: &RunHandle) -> Result<RunState> {
        Ok(self.tracker.wait(handle, None).await?)
    }

    pub fn analyze(&self, handle: &RunHandle) -> Result<Vec<Diagnostic>> {
        Ok(self.tracker.analyze(handle)?)
    }

    pub async fn restart(&self, handle: &RunHandle) -> Result<Resubmission> {
        Ok(self.tracker.restart(handle).await?)
    }
}
