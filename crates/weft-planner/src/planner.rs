//! Abstract-to-concrete expansion.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};
use weft_catalog::{
    Catalog, ContainerIndex, Directory, DirectoryKind, Namespace, Operation, ReplicaEntry, Site,
    TransformationRef,
};
use weft_config::PlannerSection;
use weft_workflow::{Job, Workflow};

use crate::error::{PlanViolation, PlanningError, Result};
use crate::plan::{
    ConcreteTask, ContainerBinding, ExecutionPlan, FileBinding, Invocation, PlanEdge, TaskKind,
    Transfer, TransferKind, is_valid_workflow_name,
};

/// Where a plan runs and where its files come from and go to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerOptions {
    /// Site compute tasks run on.
    pub execution_site: String,
    /// Site whose shared scratch holds the workflow's working files.
    pub staging_site: String,
    /// Site receiving staged-out outputs.
    pub output_site: String,
    /// Sites allowed to serve input replicas; empty allows every site.
    pub input_sites: Vec<String>,
    /// Emit stage-out tasks for outputs flagged for stage-out.
    pub stage_out: bool,
    /// Absolute directory that relative site directories resolve against.
    pub base_dir: PathBuf,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self::from(&PlannerSection::default())
    }
}

impl From<&PlannerSection> for PlannerOptions {
    fn from(section: &PlannerSection) -> Self {
        Self {
            execution_site: section.execution_site.clone(),
            staging_site: section.staging_site.clone(),
            output_site: section.output_site.clone(),
            input_sites: section.input_sites.clone(),
            stage_out: section.stage_out,
            base_dir: resolve_base_dir(section.base_dir.as_deref()),
        }
    }
}

fn resolve_base_dir(configured: Option<&std::path::Path>) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    match configured {
        Some(dir) => cwd.join(dir),
        None => cwd,
    }
}

/// Plans workflows against one finalized catalog.
#[derive(Debug, Clone)]
pub struct Planner {
    catalog: Arc<Catalog>,
    options: PlannerOptions,
}

/// A job after the first planning pass.
struct ResolvedJob<'a> {
    job: &'a Job,
    entry: TransformationRef<'a>,
    staged: bool,
    /// Replica chosen for each input without an upstream producer.
    replicas: Vec<ReplicaEntry>,
}

impl Planner {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            options: PlannerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PlannerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &PlannerOptions {
        &self.options
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Expand `workflow` into an [`ExecutionPlan`].
    ///
    /// Resolution runs over every job before any task is emitted, so all
    /// violations are reported together.
    pub fn plan(&self, workflow: &Workflow) -> Result<ExecutionPlan> {
        let opts = &self.options;
        let mut violations = Vec::new();

        if !is_valid_workflow_name(workflow.name()) {
            violations.push(PlanViolation::InvalidWorkflowName {
                workflow: workflow.name().to_string(),
            });
        }

        // Sites
        let execution_site = self.require_site(&opts.execution_site, "execution", &mut violations);
        let staging_site = self.require_site(&opts.staging_site, "staging", &mut violations);
        let output_site = self.require_site(&opts.output_site, "output", &mut violations);
        for site in &opts.input_sites {
            self.require_site(site, "input", &mut violations);
        }

        let scratch = staging_site.and_then(|site| {
            let dir = site.directory(DirectoryKind::SharedScratch);
            if dir.is_none() {
                violations.push(PlanViolation::NoScratchDirectory {
                    site: site.name.clone(),
                });
            }
            dir
        });

        let needs_storage = opts.stage_out
            && workflow
                .jobs()
                .iter()
                .any(|job| job.outputs.iter().any(|o| o.stage_out));
        let storage = match output_site {
            Some(site) if needs_storage => {
                let dir = site.directory(DirectoryKind::LocalStorage);
                if dir.is_none() {
                    violations.push(PlanViolation::NoStorageDirectory {
                        site: site.name.clone(),
                    });
                }
                dir
            }
            _ => None,
        };

        let searched_sites: Vec<String> = if opts.input_sites.is_empty() {
            self.catalog.site_names().map(String::from).collect()
        } else {
            opts.input_sites.clone()
        };

        // Resolve every job before emitting anything
        let mut resolved = Vec::with_capacity(workflow.len());
        for job in workflow.topological_order() {
            let selection = self.select_transformation(job, execution_site, &mut violations);

            let mut replicas = Vec::new();
            for file in &job.inputs {
                let lfn = file.name();
                if workflow.producer_of(lfn).is_some() {
                    continue;
                }
                match self.select_replica(workflow, lfn) {
                    Some(replica) => replicas.push(replica),
                    None => violations.push(PlanViolation::UnresolvedInput {
                        job: job.id().to_string(),
                        file: lfn.to_string(),
                        searched_sites: searched_sites.clone(),
                    }),
                }
            }

            if let Some((entry, staged)) = selection {
                resolved.push(ResolvedJob {
                    job,
                    entry,
                    staged,
                    replicas,
                });
            }
        }

        let (Some(execution_site), Some(scratch), true) =
            (execution_site, scratch, violations.is_empty())
        else {
            return Err(PlanningError {
                workflow: workflow.name().to_string(),
                violations,
            });
        };

        let mut emitter = Emitter {
            workflow: workflow.name(),
            scratch: scratch.anchored(&opts.base_dir),
            storage: storage.map(|dir| dir.anchored(&opts.base_dir)),
            options: opts,
            tasks: Vec::new(),
            positions: HashMap::new(),
            edges: BTreeSet::new(),
            pulls: BTreeMap::new(),
            duplicates: Vec::new(),
        };
        for job in &resolved {
            emitter.emit_job(workflow, execution_site, job);
        }
        if !emitter.duplicates.is_empty() {
            return Err(PlanningError {
                workflow: workflow.name().to_string(),
                violations: emitter
                    .duplicates
                    .into_iter()
                    .map(|task| PlanViolation::DuplicateTaskId { task })
                    .collect(),
            });
        }

        let plan = emitter.finish(workflow.name());
        info!(
            workflow = %plan.workflow,
            tasks = plan.tasks.len(),
            edges = plan.edges.len(),
            execution_site = %plan.execution_site,
            "Plan emitted"
        );
        Ok(plan)
    }

    fn require_site(
        &self,
        name: &str,
        role: &str,
        violations: &mut Vec<PlanViolation>,
    ) -> Option<&Site> {
        let site = self.catalog.site(name);
        if site.is_none() {
            violations.push(PlanViolation::UnknownSite {
                site: name.to_string(),
                role: role.to_string(),
            });
        }
        site
    }

    /// Pick the catalog entry for a job.
    ///
    /// An entry installed on the execution site wins; otherwise the first
    /// stageable entry is staged. Entries whose platform constraints
    /// contradict the execution site are skipped.
    fn select_transformation(
        &self,
        job: &Job,
        execution_site: Option<&Site>,
        violations: &mut Vec<PlanViolation>,
    ) -> Option<(TransformationRef<'_>, bool)> {
        let entries = self.catalog.transformations_named(&job.transformation);
        if entries.is_empty() {
            violations.push(PlanViolation::UnknownTransformation {
                job: job.id().to_string(),
                transformation: job.transformation.clone(),
            });
            return None;
        }
        let site = execution_site?;

        let candidates: Vec<_> = entries
            .into_iter()
            .filter(|e| e.transformation.runs_on(site.arch, site.os_type))
            .collect();
        if let Some(entry) = candidates.iter().find(|e| e.site.name == site.name) {
            return Some((*entry, false));
        }
        if let Some(entry) = candidates.iter().find(|e| e.transformation.is_stageable) {
            debug!(
                job = %job.id(),
                transformation = %job.transformation,
                from = %entry.site.name,
                "Staging executable"
            );
            return Some((*entry, true));
        }

        violations.push(PlanViolation::NoTransformationForSite {
            job: job.id().to_string(),
            transformation: job.transformation.clone(),
            site: site.name.clone(),
        });
        None
    }

    /// Workflow-embedded replicas first, then the catalog's. Within a source
    /// the staging site is preferred, then sites in name order.
    fn select_replica(&self, workflow: &Workflow, lfn: &str) -> Option<ReplicaEntry> {
        let allowed = |site: &str| {
            self.options.input_sites.is_empty() || self.options.input_sites.iter().any(|s| s == site)
        };

        let embedded: Vec<&ReplicaEntry> = workflow
            .replicas_of(lfn)
            .into_iter()
            .filter(|r| allowed(r.site.as_str()))
            .collect();
        let pool = if embedded.is_empty() {
            self.catalog
                .replicas(lfn)
                .iter()
                .filter(|r| allowed(r.site.as_str()))
                .collect()
        } else {
            embedded
        };

        pool.iter()
            .find(|r| r.site == self.options.staging_site)
            .or_else(|| pool.first())
            .map(|r| (*r).clone())
    }
}

/// Second planning pass: turns resolved jobs into tasks and edges.
struct Emitter<'a> {
    workflow: &'a str,
    scratch: Directory,
    storage: Option<Directory>,
    options: &'a PlannerOptions,
    tasks: Vec<ConcreteTask>,
    positions: HashMap<String, usize>,
    edges: BTreeSet<(usize, usize)>,
    pulls: BTreeMap<ContainerIndex, usize>,
    /// Ids pushed more than once, in first-collision order.
    duplicates: Vec<String>,
}

impl Emitter<'_> {
    fn scratch_url(&self, operation: Operation, name: &str) -> String {
        self.scratch
            .file_url(operation, &format!("{}/{}", self.workflow, name))
    }

    fn working_dir(&self) -> String {
        self.scratch.path().join(self.workflow).display().to_string()
    }

    fn push(&mut self, task: ConcreteTask) -> usize {
        let position = self.tasks.len();
        if self.positions.contains_key(&task.id) {
            if !self.duplicates.contains(&task.id) {
                self.duplicates.push(task.id.clone());
            }
        } else {
            self.positions.insert(task.id.clone(), position);
        }
        self.tasks.push(task);
        position
    }

    fn emit_job(&mut self, workflow: &Workflow, execution_site: &Site, resolved: &ResolvedJob<'_>) {
        let job = resolved.job;
        let transformation = resolved.entry.transformation;
        let staging_site = self.options.staging_site.clone();

        // Container image, pulled once per plan
        let container = resolved.entry.container.map(|(index, container)| {
            let image_name = format!("{}.img", container.name);
            let position = match self.pulls.get(&index) {
                Some(&position) => position,
                None => {
                    let pull = ConcreteTask {
                        id: format!("pull_{}", container.name),
                        kind: TaskKind::ContainerPull,
                        job_id: None,
                        site: staging_site.clone(),
                        invocation: None,
                        transfers: vec![Transfer {
                            lfn: container.name.clone(),
                            kind: TransferKind::ContainerImage,
                            source_site: container.image_site.clone(),
                            source_url: container.image.clone(),
                            dest_site: staging_site.clone(),
                            dest_url: self.scratch_url(Operation::Put, &image_name),
                            register_replica: false,
                        }],
                        inputs: Vec::new(),
                        outputs: Vec::new(),
                        profiles: container.profiles.clone(),
                    };
                    let position = self.push(pull);
                    self.pulls.insert(index, position);
                    position
                }
            };
            let binding = ContainerBinding {
                name: container.name.clone(),
                kind: container.kind,
                image: container.image.clone(),
                local_image: self.scratch_url(Operation::Get, &image_name),
                image_path: self
                    .scratch
                    .path()
                    .join(self.workflow)
                    .join(&image_name)
                    .display()
                    .to_string(),
                mounts: container.mounts.clone(),
            };
            (position, binding, &container.profiles)
        });

        // Stage-in: staged executable first, then replica inputs in declaration order
        let mut transfers = Vec::new();
        if resolved.staged {
            transfers.push(Transfer {
                lfn: transformation.name.clone(),
                kind: TransferKind::Executable,
                source_site: Some(transformation.site.clone()),
                source_url: transformation.pfn.clone(),
                dest_site: staging_site.clone(),
                dest_url: self.scratch_url(Operation::Put, &transformation.name),
                register_replica: false,
            });
        }
        for replica in &resolved.replicas {
            transfers.push(Transfer {
                lfn: replica.lfn.clone(),
                kind: TransferKind::Input,
                source_site: Some(replica.site.clone()),
                source_url: replica.pfn.clone(),
                dest_site: staging_site.clone(),
                dest_url: self.scratch_url(Operation::Put, &replica.lfn),
                register_replica: false,
            });
        }
        let stage_in = if transfers.is_empty() {
            None
        } else {
            Some(self.push(ConcreteTask {
                id: format!("stage_in_{}", job.id()),
                kind: TaskKind::StageIn,
                job_id: Some(job.id().to_string()),
                site: staging_site.clone(),
                invocation: None,
                transfers,
                inputs: Vec::new(),
                outputs: Vec::new(),
                profiles: Default::default(),
            }))
        };

        // Effective profiles: site < container < transformation < job
        let mut profiles = execution_site.profiles.clone();
        if let Some((_, _, container_profiles)) = &container {
            profiles.merge(container_profiles);
        }
        profiles.merge(&transformation.profiles);
        profiles.merge(&job.profiles);
        let environment = profiles
            .namespace(Namespace::Env)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let executable = if resolved.staged {
            format!("./{}", transformation.name)
        } else {
            transformation.pfn.clone()
        };

        let inputs = job
            .inputs
            .iter()
            .map(|f| FileBinding {
                lfn: f.name().to_string(),
                url: self.scratch_url(Operation::Get, f.name()),
            })
            .collect();
        let outputs = job
            .outputs
            .iter()
            .map(|o| FileBinding {
                lfn: o.file.name().to_string(),
                url: self.scratch_url(Operation::Put, o.file.name()),
            })
            .collect();

        let compute = self.push(ConcreteTask {
            id: job.id().to_string(),
            kind: TaskKind::Compute,
            job_id: Some(job.id().to_string()),
            site: execution_site.name.clone(),
            invocation: Some(Invocation {
                executable,
                arguments: job.rendered_arguments(),
                working_dir: self.working_dir(),
                container: container.as_ref().map(|(_, binding, _)| binding.clone()),
                environment,
            }),
            transfers: Vec::new(),
            inputs,
            outputs,
            profiles,
        });

        if let Some((pull, _, _)) = container {
            self.edges.insert((pull, compute));
        }
        if let Some(stage_in) = stage_in {
            self.edges.insert((stage_in, compute));
        }
        for parent in workflow.parents(job.id()) {
            if let Some(&position) = self.positions.get(parent) {
                self.edges.insert((position, compute));
            }
        }

        // Stage-out
        if !self.options.stage_out {
            return;
        }
        let Some(storage) = &self.storage else {
            return;
        };
        let output_site = self.options.output_site.clone();
        let transfers: Vec<Transfer> = job
            .outputs
            .iter()
            .filter(|o| o.stage_out)
            .map(|o| Transfer {
                lfn: o.file.name().to_string(),
                kind: TransferKind::Output,
                source_site: Some(staging_site.clone()),
                source_url: self.scratch_url(Operation::Get, o.file.name()),
                dest_site: output_site.clone(),
                dest_url: storage.file_url(Operation::Put, o.file.name()),
                register_replica: o.register_replica,
            })
            .collect();
        if transfers.is_empty() {
            return;
        }
        let stage_out = self.push(ConcreteTask {
            id: format!("stage_out_{}", job.id()),
            kind: TaskKind::StageOut,
            job_id: Some(job.id().to_string()),
            site: staging_site,
            invocation: None,
            transfers,
            inputs: Vec::new(),
            outputs: Vec::new(),
            profiles: Default::default(),
        });
        self.edges.insert((compute, stage_out));
    }

    fn finish(self, workflow: &str) -> ExecutionPlan {
        let edges = self
            .edges
            .iter()
            .map(|&(parent, child)| PlanEdge {
                parent: self.tasks[parent].id.clone(),
                child: self.tasks[child].id.clone(),
            })
            .collect();
        ExecutionPlan {
            workflow: workflow.to_string(),
            execution_site: self.options.execution_site.clone(),
            staging_site: self.options.staging_site.clone(),
            output_site: self.options.output_site.clone(),
            tasks: self.tasks,
            edges,
        }
    }
}
