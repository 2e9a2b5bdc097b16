//! Built, immutable workflow.

use std::collections::BTreeMap;

use weft_catalog::ReplicaEntry;

use crate::job::Job;

/// A validated, acyclic abstract workflow.
///
/// Produced by [`WorkflowBuilder::build`](crate::WorkflowBuilder::build).
/// Jobs keep their insertion order; [`Workflow::topological_order`] yields
/// them producer-first, breaking ties by insertion order.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub(crate) name: String,
    pub(crate) jobs: Vec<Job>,
    pub(crate) index: BTreeMap<String, usize>,
    /// Sorted parent indices per job.
    pub(crate) parents: Vec<Vec<usize>>,
    /// Sorted child indices per job.
    pub(crate) children: Vec<Vec<usize>>,
    pub(crate) order: Vec<usize>,
    pub(crate) producers: BTreeMap<String, usize>,
    pub(crate) replicas: Vec<ReplicaEntry>,
}

impl Workflow {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs in insertion order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.index.get(id).map(|&i| &self.jobs[i])
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Identifiers of the jobs `id` depends on, in insertion order.
    pub fn parents(&self, id: &str) -> Vec<&str> {
        self.related(id, &self.parents)
    }

    /// Identifiers of the jobs depending on `id`, in insertion order.
    pub fn children(&self, id: &str) -> Vec<&str> {
        self.related(id, &self.children)
    }

    fn related(&self, id: &str, adjacency: &[Vec<usize>]) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| adjacency[i].iter().map(|&j| self.jobs[j].id()).collect())
            .unwrap_or_default()
    }

    /// Jobs ordered so every producer precedes its consumers.
    pub fn topological_order(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().map(|&i| &self.jobs[i])
    }

    /// The job declaring `lfn` as an output, if any.
    pub fn producer_of(&self, lfn: &str) -> Option<&Job> {
        self.producers.get(lfn).map(|&i| &self.jobs[i])
    }

    /// Every dependency edge as `(parent, child)`, ordered by child then parent
    /// insertion position.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.parents
            .iter()
            .enumerate()
            .flat_map(|(child, parents)| {
                parents
                    .iter()
                    .map(move |&parent| (self.jobs[parent].id(), self.jobs[child].id()))
            })
            .collect()
    }

    /// Replicas embedded in the workflow itself.
    pub fn replicas(&self) -> &[ReplicaEntry] {
        &self.replicas
    }

    /// Embedded replicas of `lfn`, ordered by site.
    pub fn replicas_of(&self, lfn: &str) -> Vec<&ReplicaEntry> {
        let mut found: Vec<_> = self.replicas.iter().filter(|r| r.lfn == lfn).collect();
        found.sort_by(|a, b| a.site.cmp(&b.site));
        found
    }
}
