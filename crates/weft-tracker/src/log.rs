//! Durable per-run storage.
//!
//! Layout: `{runs_dir}/{run_id}/plan.json` holds the current plan and
//! `{runs_dir}/{run_id}/events.jsonl` the append-only event log. The state
//! of a run is always `RunState::replay(plan, events)`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};
use weft_planner::{ExecutionPlan, is_valid_workflow_name};

use crate::error::{Result, TrackerError};
use crate::state::RunEvent;

const PLAN_FILE: &str = "plan.json";
const EVENTS_FILE: &str = "events.jsonl";

/// `run_id` must name a direct child of `runs_dir`.
fn run_dir(runs_dir: &Path, run_id: &str) -> Result<PathBuf> {
    if !is_valid_workflow_name(run_id) {
        return Err(TrackerError::InvalidRunId(run_id.to_string()));
    }
    Ok(runs_dir.join(run_id))
}

/// Append-only JSONL event log plus the plan it applies to.
pub struct RunLog {
    dir: PathBuf,
    events: Mutex<File>,
}

impl RunLog {
    /// Create the run directory, write `plan` and start an empty log.
    pub fn create(runs_dir: &Path, run_id: &str, plan: &ExecutionPlan) -> Result<Self> {
        let dir = run_dir(runs_dir, run_id)?;
        fs::create_dir_all(&dir)?;
        write_plan_file(&dir, plan)?;
        let events = open_events(&dir)?;
        debug!(run_id, dir = %dir.display(), "Run log created");
        Ok(Self {
            dir,
            events: Mutex::new(events),
        })
    }

    /// Open an existing run, returning its plan and every logged event.
    pub fn open(runs_dir: &Path, run_id: &str) -> Result<(Self, ExecutionPlan, Vec<RunEvent>)> {
        let dir = run_dir(runs_dir, run_id)?;
        let plan_path = dir.join(PLAN_FILE);
        if !plan_path.exists() {
            return Err(TrackerError::UnknownRun(run_id.to_string()));
        }

        let plan = ExecutionPlan::from_json(&fs::read_to_string(&plan_path)?)?;
        let events = read_events(&dir.join(EVENTS_FILE))?;
        let file = open_events(&dir)?;
        Ok((
            Self {
                dir,
                events: Mutex::new(file),
            },
            plan,
            events,
        ))
    }

    /// Append one event and flush it to disk.
    pub fn append(&self, event: &RunEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = self.events.lock();
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Replace the stored plan.
    pub fn write_plan(&self, plan: &ExecutionPlan) -> Result<()> {
        write_plan_file(&self.dir, plan)
    }

    /// Every logged event, in order.
    pub fn read_events(&self) -> Result<Vec<RunEvent>> {
        read_events(&self.dir.join(EVENTS_FILE))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn open_events(dir: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(EVENTS_FILE))?)
}

fn write_plan_file(dir: &Path, plan: &ExecutionPlan) -> Result<()> {
    // write then rename so a crash never leaves a half-written plan
    let tmp = dir.join(format!("{PLAN_FILE}.tmp"));
    let mut file = File::create(&tmp)?;
    file.write_all(plan.to_json()?.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp, dir.join(PLAN_FILE))?;
    Ok(())
}

fn read_events(path: &Path) -> Result<Vec<RunEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let lines: Vec<String> = reader
        .lines()
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .collect();

    let mut events = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str(line) {
            Ok(event) => events.push(event),
            // a crash mid-append leaves at most the last line torn
            Err(e) if i + 1 == lines.len() => {
                warn!(path = %path.display(), error = %e, "Ignoring truncated run log entry");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(events)
}
