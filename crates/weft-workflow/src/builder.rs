//! Mutable accumulation phase of a workflow.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

use tracing::{debug, info};
use weft_catalog::{LogicalFile, ReplicaEntry};

use crate::error::{Result, WorkflowError, WorkflowViolation};
use crate::job::Job;
use crate::workflow::Workflow;

/// Collects jobs, explicit dependencies and embedded replicas.
///
/// [`WorkflowBuilder::build`] can be called any number of times; each call
/// derives the graph afresh from the current job definitions.
#[derive(Debug, Default)]
pub struct WorkflowBuilder {
    name: String,
    jobs: Vec<Job>,
    ids: HashMap<String, usize>,
    next_auto_id: u32,
    dependencies: Vec<(String, String)>,
    replicas: Vec<ReplicaEntry>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a job, returning its identifier.
    ///
    /// Jobs without an identifier receive the next free `ID0000001`-style id.
    /// Fails immediately if the identifier is already taken.
    pub fn add_job(&mut self, mut job: Job) -> Result<&str> {
        if job.id().is_empty() {
            let id = self.next_free_id();
            job.assign_id(id);
        }
        if self.ids.contains_key(job.id()) {
            return Err(WorkflowError::DuplicateJob(job.id().to_string()));
        }

        let idx = self.jobs.len();
        debug!(job = %job.id(), transformation = %job.transformation, "Added job");
        self.ids.insert(job.id().to_string(), idx);
        self.jobs.push(job);
        Ok(self.jobs[idx].id())
    }

    fn next_free_id(&mut self) -> String {
        loop {
            self.next_auto_id += 1;
            let candidate = format!("ID{:07}", self.next_auto_id);
            if !self.ids.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Mutable access to a job's arguments, files and profiles.
    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.ids.get(id).map(|&i| &mut self.jobs[i])
    }

    /// Declare that `child` runs after `parent` regardless of file usage.
    pub fn add_dependency(&mut self, parent: impl Into<String>, child: impl Into<String>) -> &mut Self {
        self.dependencies.push((parent.into(), child.into()));
        self
    }

    /// Embed a replica in the workflow. Embedded replicas are consulted
    /// before the catalog store's.
    pub fn add_replica(
        &mut self,
        site: impl Into<String>,
        file: impl Into<LogicalFile>,
        pfn: impl Into<String>,
    ) -> &mut Self {
        let file = file.into();
        self.replicas.push(ReplicaEntry::new(site, file.name(), pfn));
        self
    }

    /// Derive the dependency graph and validate it.
    ///
    /// Every violation is collected: duplicate outputs, unknown explicit
    /// dependencies, duplicate embedded replicas and, if present, one cycle.
    pub fn build(&self) -> Result<Workflow> {
        let mut violations = Vec::new();
        let n = self.jobs.len();

        // Index outputs
        let mut producers: BTreeMap<String, usize> = BTreeMap::new();
        for (idx, job) in self.jobs.iter().enumerate() {
            for output in &job.outputs {
                let lfn = output.file.name();
                match producers.get(lfn) {
                    Some(&first) if first != idx => {
                        violations.push(WorkflowViolation::DuplicateOutput {
                            file: lfn.to_string(),
                            first_job: self.jobs[first].id().to_string(),
                            second_job: job.id().to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        producers.insert(lfn.to_string(), idx);
                    }
                }
            }
        }

        // Derived edges: producer -> consumer
        let mut parents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (idx, job) in self.jobs.iter().enumerate() {
            for input in &job.inputs {
                if let Some(&producer) = producers.get(input.name()) {
                    parents[idx].insert(producer);
                }
            }
        }

        // Explicit edges
        for (parent, child) in &self.dependencies {
            let p = self.ids.get(parent);
            let c = self.ids.get(child);
            if p.is_none() {
                violations.push(WorkflowViolation::UnknownJob {
                    job: parent.clone(),
                    referenced_by: child.clone(),
                });
            }
            if c.is_none() {
                violations.push(WorkflowViolation::UnknownJob {
                    job: child.clone(),
                    referenced_by: parent.clone(),
                });
            }
            if let (Some(&p), Some(&c)) = (p, c) {
                parents[c].insert(p);
            }
        }

        // Embedded replicas
        let mut seen_replicas: HashSet<(&str, &str)> = HashSet::new();
        for replica in &self.replicas {
            if !seen_replicas.insert((replica.lfn.as_str(), replica.site.as_str())) {
                violations.push(WorkflowViolation::DuplicateReplica {
                    lfn: replica.lfn.clone(),
                    site: replica.site.clone(),
                });
            }
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (child, ps) in parents.iter().enumerate() {
            for &parent in ps {
                children[parent].push(child);
            }
        }

        let order = match stable_topological_order(&parents, &children) {
            Ok(order) => order,
            Err(remaining) => {
                let cycle = find_cycle(&parents, &remaining)
                    .into_iter()
                    .map(|i| self.jobs[i].id().to_string())
                    .collect();
                violations.push(WorkflowViolation::CyclicDependency { cycle });
                Vec::new()
            }
        };

        if !violations.is_empty() {
            return Err(WorkflowError::Invalid {
                workflow: self.name.clone(),
                violations,
            });
        }

        let parents: Vec<Vec<usize>> = parents.into_iter().map(|s| s.into_iter().collect()).collect();
        info!(
            workflow = %self.name,
            jobs = n,
            edges = parents.iter().map(Vec::len).sum::<usize>(),
            "Workflow built"
        );

        Ok(Workflow {
            name: self.name.clone(),
            jobs: self.jobs.clone(),
            index: self
                .ids
                .iter()
                .map(|(id, &i)| (id.clone(), i))
                .collect(),
            parents,
            children,
            order,
            producers,
            replicas: self.replicas.clone(),
        })
    }
}

/// Kahn's algorithm, always releasing the earliest inserted ready job.
///
/// Returns the set of jobs left on a cycle when the graph is cyclic.
fn stable_topological_order(
    parents: &[BTreeSet<usize>],
    children: &[Vec<usize>],
) -> std::result::Result<Vec<usize>, BTreeSet<usize>> {
    let n = parents.len();
    let mut in_degree: Vec<usize> = parents.iter().map(BTreeSet::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> =
        (0..n).filter(|&i| in_degree[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &child in &children[node] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.push(Reverse(child));
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err((0..n).filter(|&i| in_degree[i] > 0).collect())
    }
}

/// Walk parent links from the earliest remaining job until a job repeats.
///
/// Every job left over by Kahn's algorithm has at least one remaining parent,
/// so the walk always closes a cycle. Choosing the smallest parent each step
/// makes the reported cycle identical across runs.
fn find_cycle(parents: &[BTreeSet<usize>], remaining: &BTreeSet<usize>) -> Vec<usize> {
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(&parent) = parents[current].iter().find(|p| remaining.contains(*p)) else {
            return Vec::new();
        };
        if let Some(&at) = position.get(&parent) {
            // path runs consumer -> producer; report producer first
            let mut cycle: Vec<usize> = path[at..].iter().rev().copied().collect();
            let min_pos = cycle
                .iter()
                .enumerate()
                .min_by_key(|(_, idx)| **idx)
                .map(|(pos, _)| pos)
                .unwrap_or(0);
            cycle.rotate_left(min_pos);
            return cycle;
        }
        position.insert(parent, path.len());
        path.push(parent);
        current = parent;
    }
}
