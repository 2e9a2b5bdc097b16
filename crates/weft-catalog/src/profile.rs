//! Namespaced key/value overrides.
//!
//! Sites, transformations, containers and jobs can all carry profiles. The
//! planner layers them site, then container, then transformation, then job,
//! so the most specific declaration wins.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Profile namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Environment variables exported to the task.
    Env,
    /// Batch-scheduler submit keys (e.g. `request_disk`).
    Condor,
    /// Planner-level resource requests (e.g. `memory`, `cores`).
    Pegasus,
    /// Workflow-engine knobs (e.g. `retry`).
    Dagman,
    /// Site selection hints.
    Selector,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Condor => "condor",
            Self::Pegasus => "pegasus",
            Self::Dagman => "dagman",
            Self::Selector => "selector",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of namespaced profile entries with a stable iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profiles(BTreeMap<Namespace, BTreeMap<String, String>>);

impl Profiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, replacing any previous value.
    pub fn insert(&mut self, namespace: Namespace, key: impl Into<String>, value: impl Into<String>) {
        self.0
            .entry(namespace)
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Builder form of [`Profiles::insert`].
    pub fn with(mut self, namespace: Namespace, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(namespace, key, value);
        self
    }

    pub fn get(&self, namespace: Namespace, key: &str) -> Option<&str> {
        self.0
            .get(&namespace)
            .and_then(|entries| entries.get(key))
            .map(String::as_str)
    }

    /// All entries of one namespace, ordered by key.
    pub fn namespace(&self, namespace: Namespace) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .get(&namespace)
            .into_iter()
            .flat_map(|entries| entries.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Every entry, ordered by namespace then key.
    pub fn iter(&self) -> impl Iterator<Item = (Namespace, &str, &str)> {
        self.0.iter().flat_map(|(ns, entries)| {
            entries.iter().map(move |(k, v)| (*ns, k.as_str(), v.as_str()))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }

    /// Total number of entries across all namespaces.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    /// Layer `overlay` on top of `self`; keys present in both take the overlay value.
    pub fn merge(&mut self, overlay: &Profiles) {
        for (ns, key, value) in overlay.iter() {
            self.insert(ns, key, value);
        }
    }
}
