//! Concrete execution plan types.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use weft_catalog::{ContainerKind, Profiles};

/// What a concrete task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Runs a job's executable.
    Compute,
    /// Moves inputs (and a staged executable) into scratch.
    StageIn,
    /// Moves outputs from scratch to the output site.
    StageOut,
    /// Fetches a container image into scratch.
    ContainerPull,
}

/// What a transfer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Input,
    Executable,
    Output,
    ContainerImage,
}

/// One file movement performed by a staging or pull task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub lfn: String,
    pub kind: TransferKind,
    /// `None` for images pulled from a registry.
    pub source_site: Option<String>,
    pub source_url: String,
    pub dest_site: String,
    pub dest_url: String,
    /// Record the destination as a new replica once the transfer succeeds.
    #[serde(default)]
    pub register_replica: bool,
}

/// A logical file bound to the physical location a task reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBinding {
    pub lfn: String,
    pub url: String,
}

/// The container a compute task is wrapped in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerBinding {
    pub name: String,
    pub kind: ContainerKind,
    pub image: String,
    /// Where the pull task leaves the image.
    pub local_image: String,
    /// Filesystem path of the pulled image on the execution host.
    pub image_path: String,
    pub mounts: Vec<String>,
}

/// How to run a compute task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub executable: String,
    pub arguments: Vec<String>,
    pub working_dir: String,
    pub container: Option<ContainerBinding>,
    pub environment: BTreeMap<String, String>,
}

impl Invocation {
    /// The full command line, wrapped in the container runtime when the task
    /// runs inside a container.
    pub fn command_line(&self) -> Vec<String> {
        let mut cmd = Vec::new();
        if let Some(ref container) = self.container {
            match container.kind {
                ContainerKind::Docker => {
                    cmd.extend(["docker", "run", "--rm"].map(String::from));
                    cmd.push("-v".into());
                    cmd.push(format!("{wd}:{wd}", wd = self.working_dir));
                    for mount in &container.mounts {
                        cmd.push("-v".into());
                        cmd.push(mount.clone());
                    }
                    cmd.push("-w".into());
                    cmd.push(self.working_dir.clone());
                    for (key, value) in &self.environment {
                        cmd.push("-e".into());
                        cmd.push(format!("{key}={value}"));
                    }
                    cmd.push(
                        container
                            .image
                            .strip_prefix("docker://")
                            .unwrap_or(&container.image)
                            .to_string(),
                    );
                }
                ContainerKind::Singularity => {
                    cmd.extend(["singularity", "exec"].map(String::from));
                    cmd.push("--bind".into());
                    cmd.push(self.working_dir.clone());
                    for mount in &container.mounts {
                        cmd.push("--bind".into());
                        cmd.push(mount.clone());
                    }
                    cmd.push("--pwd".into());
                    cmd.push(self.working_dir.clone());
                    for (key, value) in &self.environment {
                        cmd.push("--env".into());
                        cmd.push(format!("{key}={value}"));
                    }
                    cmd.push(container.image_path.clone());
                }
                ContainerKind::Shifter => {
                    cmd.push("shifter".into());
                    cmd.push(format!("--image={}", container.image));
                    for mount in &container.mounts {
                        cmd.push(format!("--volume={mount}"));
                    }
                    for (key, value) in &self.environment {
                        cmd.push(format!("--env={key}={value}"));
                    }
                }
            }
        }
        cmd.push(self.executable.clone());
        cmd.extend(self.arguments.iter().cloned());
        cmd
    }
}

/// One unit of work handed to the execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteTask {
    pub id: String,
    pub kind: TaskKind,
    /// Abstract job this task was expanded from, if any.
    pub job_id: Option<String>,
    pub site: String,
    /// Present for compute tasks.
    pub invocation: Option<Invocation>,
    /// Present for staging and pull tasks.
    pub transfers: Vec<Transfer>,
    pub inputs: Vec<FileBinding>,
    pub outputs: Vec<FileBinding>,
    pub profiles: Profiles,
}

/// `parent` must succeed before `child` may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEdge {
    pub parent: String,
    pub child: String,
}

/// Task ids that differ between two plans of the same workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanDiff {
    /// Present in both plans with a different definition or parent set.
    pub changed: Vec<String>,
    /// Only in the newer plan.
    pub added: Vec<String>,
    /// Only in the older plan.
    pub removed: Vec<String>,
}

impl PlanDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

/// A structural problem that makes a plan unrunnable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDefect {
    /// The workflow name cannot be used as a run directory name.
    InvalidWorkflowName(String),
    /// Two tasks share an id.
    DuplicateTask(String),
    /// An edge names a task that is not in the plan.
    UnknownTask { parent: String, child: String },
    /// An edge points from a later task to an earlier one.
    BackwardEdge { parent: String, child: String },
}

impl fmt::Display for PlanDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWorkflowName(name) => write!(f, "invalid workflow name '{name}'"),
            Self::DuplicateTask(id) => write!(f, "task id '{id}' is used more than once"),
            Self::UnknownTask { parent, child } => {
                write!(f, "edge {parent} -> {child} names an unknown task")
            }
            Self::BackwardEdge { parent, child } => {
                write!(f, "edge {parent} -> {child} runs against task order")
            }
        }
    }
}

/// Whether `name` can be used as a single path component.
pub fn is_valid_workflow_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// A concrete, dependency-ordered plan.
///
/// Tasks appear in a topological order; edges are sorted by the position of
/// the parent, then the child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub workflow: String,
    pub execution_site: String,
    pub staging_site: String,
    pub output_site: String,
    pub tasks: Vec<ConcreteTask>,
    pub edges: Vec<PlanEdge>,
}

impl ExecutionPlan {
    pub fn task(&self, id: &str) -> Option<&ConcreteTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks_of_kind(&self, kind: TaskKind) -> impl Iterator<Item = &ConcreteTask> {
        self.tasks.iter().filter(move |t| t.kind == kind)
    }

    pub fn parents(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.child == id)
            .map(|e| e.parent.as_str())
            .collect()
    }

    pub fn children(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.parent == id)
            .map(|e| e.child.as_str())
            .collect()
    }

    /// `roots` plus every task reachable from them.
    pub fn with_descendants<'a, I>(&self, roots: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            children
                .entry(edge.parent.as_str())
                .or_default()
                .push(edge.child.as_str());
        }

        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = roots.into_iter().map(String::from).collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(next) = children.get(id.as_str()) {
                queue.extend(next.iter().map(|c| c.to_string()));
            }
        }
        seen
    }

    /// Structural problems, in task then edge order. Empty for every plan
    /// the planner emits.
    pub fn defects(&self) -> Vec<PlanDefect> {
        let mut defects = Vec::new();
        if !is_valid_workflow_name(&self.workflow) {
            defects.push(PlanDefect::InvalidWorkflowName(self.workflow.clone()));
        }

        let mut positions = HashMap::with_capacity(self.tasks.len());
        let mut reported = HashSet::new();
        for (position, task) in self.tasks.iter().enumerate() {
            if positions.insert(task.id.as_str(), position).is_some()
                && reported.insert(task.id.as_str())
            {
                defects.push(PlanDefect::DuplicateTask(task.id.clone()));
            }
        }

        for edge in &self.edges {
            let (parent, child) = (edge.parent.clone(), edge.child.clone());
            match (
                positions.get(edge.parent.as_str()),
                positions.get(edge.child.as_str()),
            ) {
                (Some(p), Some(c)) if p < c => {}
                (Some(_), Some(_)) => defects.push(PlanDefect::BackwardEdge { parent, child }),
                _ => defects.push(PlanDefect::UnknownTask { parent, child }),
            }
        }
        defects
    }

    /// Stable pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// SHA-256 of the serialized plan, hex encoded.
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Compare `newer` against this plan, task by task.
    pub fn diff(&self, newer: &ExecutionPlan) -> PlanDiff {
        let mut diff = PlanDiff::default();
        for task in &newer.tasks {
            match self.task(&task.id) {
                None => diff.added.push(task.id.clone()),
                Some(old) => {
                    let old_parents: BTreeSet<&str> = self.parents(&old.id).into_iter().collect();
                    let new_parents: BTreeSet<&str> =
                        newer.parents(&task.id).into_iter().collect();
                    if old != task || old_parents != new_parents {
                        diff.changed.push(task.id.clone());
                    }
                }
            }
        }
        for task in &self.tasks {
            if newer.task(&task.id).is_none() {
                diff.removed.push(task.id.clone());
            }
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> ConcreteTask {
        ConcreteTask {
            id: id.to_string(),
            kind: TaskKind::Compute,
            job_id: Some(id.to_string()),
            site: "condorpool".to_string(),
            invocation: Some(Invocation {
                executable: "/usr/bin/keg".to_string(),
                arguments: vec!["-i".to_string(), "f.a".to_string()],
                working_dir: "/scratch/wf".to_string(),
                container: None,
                environment: BTreeMap::new(),
            }),
            transfers: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            profiles: Profiles::new(),
        }
    }

    fn chain() -> ExecutionPlan {
        ExecutionPlan {
            workflow: "wf".to_string(),
            execution_site: "condorpool".to_string(),
            staging_site: "local".to_string(),
            output_site: "local".to_string(),
            tasks: vec![task("a"), task("b"), task("c"), task("d")],
            edges: vec![
                PlanEdge {
                    parent: "a".into(),
                    child: "b".into(),
                },
                PlanEdge {
                    parent: "b".into(),
                    child: "c".into(),
                },
            ],
        }
    }

    #[test]
    fn test_with_descendants() {
        let plan = chain();
        let set = plan.with_descendants(["b"]);
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(plan.with_descendants(["a", "d"]).len(), 4);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let plan = chain();
        let same = chain();
        assert_eq!(plan.fingerprint().unwrap(), same.fingerprint().unwrap());
        assert_eq!(plan.fingerprint().unwrap().len(), 64);

        let mut other = chain();
        other.tasks[0].site = "hpc".to_string();
        assert_ne!(plan.fingerprint().unwrap(), other.fingerprint().unwrap());
    }

    #[test]
    fn test_diff() {
        let old = chain();
        let mut new = chain();
        new.tasks[2]
            .invocation
            .as_mut()
            .unwrap()
            .arguments
            .push("-v".to_string());
        new.tasks.retain(|t| t.id != "d");
        new.tasks.push(task("e"));
        new.edges.push(PlanEdge {
            parent: "a".into(),
            child: "e".into(),
        });

        let diff = old.diff(&new);
        assert_eq!(diff.changed, vec!["c"]);
        assert_eq!(diff.added, vec!["e"]);
        assert_eq!(diff.removed, vec!["d"]);
        assert!(old.diff(&chain()).is_empty());
    }

    #[test]
    fn test_diff_detects_new_parent() {
        let old = chain();
        let mut new = chain();
        new.edges.push(PlanEdge {
            parent: "a".into(),
            child: "d".into(),
        });
        assert_eq!(old.diff(&new).changed, vec!["d"]);
    }

    #[test]
    fn test_command_line_plain() {
        let inv = task("a").invocation.unwrap();
        assert_eq!(inv.command_line(), vec!["/usr/bin/keg", "-i", "f.a"]);
    }

    #[test]
    fn test_command_line_docker() {
        let mut inv = task("a").invocation.unwrap();
        inv.environment.insert("KEG_MODE".into(), "fast".into());
        inv.container = Some(ContainerBinding {
            name: "centos-base".into(),
            kind: ContainerKind::Docker,
            image: "docker://centos:7".into(),
            local_image: "file:///scratch/wf/centos-base.img".into(),
            image_path: "/scratch/wf/centos-base.img".into(),
            mounts: vec!["/data:/data".into()],
        });
        assert_eq!(
            inv.command_line(),
            vec![
                "docker", "run", "--rm", "-v", "/scratch/wf:/scratch/wf", "-v", "/data:/data",
                "-w", "/scratch/wf", "-e", "KEG_MODE=fast", "centos:7", "/usr/bin/keg", "-i",
                "f.a",
            ]
        );
    }

    #[test]
    fn test_command_line_singularity_uses_image_path() {
        let mut inv = task("a").invocation.unwrap();
        inv.container = Some(ContainerBinding {
            name: "centos-base".into(),
            kind: ContainerKind::Singularity,
            image: "docker://centos:7".into(),
            local_image: "file:///scratch/wf/centos-base.img".into(),
            image_path: "/scratch/wf/centos-base.img".into(),
            mounts: Vec::new(),
        });
        let cmd = inv.command_line();
        assert_eq!(&cmd[..2], &["singularity", "exec"]);
        assert!(cmd.contains(&"/scratch/wf/centos-base.img".to_string()));
        assert!(!cmd.iter().any(|arg| arg.starts_with("file:")));
        assert_eq!(cmd.last().map(String::as_str), Some("f.a"));
    }

    #[test]
    fn test_defects_empty_for_well_formed_plan() {
        assert!(chain().defects().is_empty());
    }

    #[test]
    fn test_defects_report_duplicates_and_bad_edges() {
        let mut plan = chain();
        plan.tasks.push(task("b"));
        plan.edges.push(PlanEdge {
            parent: "c".into(),
            child: "a".into(),
        });
        plan.edges.push(PlanEdge {
            parent: "a".into(),
            child: "ghost".into(),
        });

        assert_eq!(
            plan.defects(),
            vec![
                PlanDefect::DuplicateTask("b".into()),
                PlanDefect::BackwardEdge {
                    parent: "c".into(),
                    child: "a".into(),
                },
                PlanDefect::UnknownTask {
                    parent: "a".into(),
                    child: "ghost".into(),
                },
            ]
        );
    }

    #[test]
    fn test_workflow_name_must_be_one_path_component() {
        for name in ["diamond", "blackdiamond-2", "..x"] {
            assert!(is_valid_workflow_name(name), "{name}");
        }
        for name in ["", ".", "..", "../x", "a/b", "a\\b"] {
            assert!(!is_valid_workflow_name(name), "{name}");
        }

        let mut plan = chain();
        plan.workflow = "../escape".into();
        assert_eq!(
            plan.defects(),
            vec![PlanDefect::InvalidWorkflowName("../escape".into())]
        );
    }
}
