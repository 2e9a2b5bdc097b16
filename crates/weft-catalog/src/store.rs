//! Two-phase catalog store.
//!
//! [`CatalogBuilder`] accumulates entries without checking them.
//! [`CatalogBuilder::finalize`] validates every cross-reference, collecting
//! all violations, and produces a [`Catalog`] whose references are resolved
//! into indices. A finalized catalog is never mutated again, so it can be
//! shared behind an `Arc` by the planner and tracker.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use crate::error::{CatalogError, CatalogViolation, Result};
use crate::file::LogicalFile;
use crate::replica::ReplicaEntry;
use crate::site::{DEFAULT_POOL_SITE, LOCAL_SITE, Site};
use crate::transformation::{Container, Transformation};

/// Index of a site inside a finalized [`Catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SiteIndex(usize);

/// Index of a container inside a finalized [`Catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerIndex(usize);

/// Index of a transformation entry inside a finalized [`Catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransformationIndex(usize);

impl SiteIndex {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl ContainerIndex {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl TransformationIndex {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Mutable accumulation phase of the catalog store.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    replicas: Vec<ReplicaEntry>,
    transformations: Vec<Transformation>,
    sites: Vec<Site>,
    containers: Vec<Container>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a physical copy of `file` on `site`.
    pub fn add_replica(
        &mut self,
        site: impl Into<String>,
        file: impl Into<LogicalFile>,
        pfn: impl Into<String>,
    ) -> &mut Self {
        let file = file.into();
        self.replicas
            .push(ReplicaEntry::new(site, file.name(), pfn));
        self
    }

    pub fn add_transformation(&mut self, transformation: Transformation) -> &mut Self {
        self.transformations.push(transformation);
        self
    }

    /// Register a site. A site named after a reserved identifier replaces the
    /// built-in default for that identifier.
    pub fn add_site(&mut self, site: Site) -> &mut Self {
        self.sites.push(site);
        self
    }

    pub fn add_container(&mut self, container: Container) -> &mut Self {
        self.containers.push(container);
        self
    }

    /// Validate all entries and freeze them into a [`Catalog`].
    ///
    /// Checks, reporting every violation found:
    /// - no duplicate site, container or (transformation, site) entries
    /// - no duplicate (file, site) replica pairs
    /// - every site referenced by a transformation or container exists
    /// - every container referenced by a transformation exists
    pub fn finalize(self) -> Result<Catalog> {
        let mut violations = Vec::new();

        // Sites (reserved identifiers are seeded when not supplied)
        let mut sites: Vec<Site> = Vec::with_capacity(self.sites.len() + 2);
        let mut site_index: BTreeMap<String, SiteIndex> = BTreeMap::new();
        for site in self.sites {
            if site_index.contains_key(&site.name) {
                violations.push(CatalogViolation::DuplicateSite { site: site.name });
                continue;
            }
            site_index.insert(site.name.clone(), SiteIndex(sites.len()));
            sites.push(site);
        }
        for reserved in [Site::default_local(), Site::default_pool()] {
            if !site_index.contains_key(&reserved.name) {
                debug!(site = %reserved.name, "Seeding reserved site");
                site_index.insert(reserved.name.clone(), SiteIndex(sites.len()));
                sites.push(reserved);
            }
        }

        // Containers
        let mut containers: Vec<Container> = Vec::with_capacity(self.containers.len());
        let mut container_index: BTreeMap<String, ContainerIndex> = BTreeMap::new();
        for container in self.containers {
            if container_index.contains_key(&container.name) {
                violations.push(CatalogViolation::DuplicateContainer {
                    container: container.name,
                });
                continue;
            }
            if let Some(ref image_site) = container.image_site
                && !site_index.contains_key(image_site)
            {
                violations.push(CatalogViolation::UnknownSite {
                    site: image_site.clone(),
                    referenced_by: format!("container '{}'", container.name),
                });
            }
            container_index.insert(container.name.clone(), ContainerIndex(containers.len()));
            containers.push(container);
        }

        // Transformations
        let mut transformations = Vec::with_capacity(self.transformations.len());
        let mut by_name: BTreeMap<String, Vec<TransformationIndex>> = BTreeMap::new();
        let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
        for transformation in self.transformations {
            let key = (transformation.name.clone(), transformation.site.clone());
            if !seen_pairs.insert(key) {
                violations.push(CatalogViolation::DuplicateTransformation {
                    name: transformation.name,
                    site: transformation.site,
                });
                continue;
            }

            let site = site_index.get(&transformation.site).copied();
            if site.is_none() {
                violations.push(CatalogViolation::UnknownSite {
                    site: transformation.site.clone(),
                    referenced_by: format!("transformation '{}'", transformation.name),
                });
            }

            let container = match transformation.container {
                Some(ref name) => match container_index.get(name) {
                    Some(idx) => Some(*idx),
                    None => {
                        violations.push(CatalogViolation::UnknownContainer {
                            container: name.clone(),
                            transformation: transformation.name.clone(),
                            site: transformation.site.clone(),
                        });
                        None
                    }
                },
                None => None,
            };

            if let Some(site) = site {
                let idx = TransformationIndex(transformations.len());
                by_name
                    .entry(transformation.name.clone())
                    .or_default()
                    .push(idx);
                transformations.push(ResolvedTransformation {
                    transformation,
                    site,
                    container,
                });
            }
        }

        // Replicas
        let mut replicas: BTreeMap<String, Vec<ReplicaEntry>> = BTreeMap::new();
        for replica in self.replicas {
            let entries = replicas.entry(replica.lfn.clone()).or_default();
            if entries.iter().any(|e| e.site == replica.site) {
                violations.push(CatalogViolation::DuplicateReplica {
                    lfn: replica.lfn,
                    site: replica.site,
                });
                continue;
            }
            entries.push(replica);
        }
        for entries in replicas.values_mut() {
            entries.sort_by(|a, b| a.site.cmp(&b.site));
        }

        if !violations.is_empty() {
            return Err(CatalogError::Validation { violations });
        }

        info!(
            sites = sites.len(),
            containers = containers.len(),
            transformations = transformations.len(),
            replicas = replicas.values().map(Vec::len).sum::<usize>(),
            "Catalog finalized"
        );

        Ok(Catalog {
            sites,
            site_index,
            containers,
            container_index,
            transformations,
            by_name,
            replicas,
        })
    }
}

#[derive(Debug)]
struct ResolvedTransformation {
    transformation: Transformation,
    site: SiteIndex,
    container: Option<ContainerIndex>,
}

/// Read-only view of one transformation entry with its references resolved.
#[derive(Debug, Clone, Copy)]
pub struct TransformationRef<'a> {
    pub index: TransformationIndex,
    pub transformation: &'a Transformation,
    pub site: &'a Site,
    pub container: Option<(ContainerIndex, &'a Container)>,
}

/// Finalized, immutable catalog store.
#[derive(Debug)]
pub struct Catalog {
    sites: Vec<Site>,
    site_index: BTreeMap<String, SiteIndex>,
    containers: Vec<Container>,
    container_index: BTreeMap<String, ContainerIndex>,
    transformations: Vec<ResolvedTransformation>,
    by_name: BTreeMap<String, Vec<TransformationIndex>>,
    replicas: BTreeMap<String, Vec<ReplicaEntry>>,
}

impl Catalog {
    pub fn site(&self, name: &str) -> Option<&Site> {
        self.site_index.get(name).map(|idx| &self.sites[idx.0])
    }

    pub fn site_index(&self, name: &str) -> Option<SiteIndex> {
        self.site_index.get(name).copied()
    }

    pub fn site_at(&self, index: SiteIndex) -> &Site {
        &self.sites[index.0]
    }

    /// Site names in sorted order.
    pub fn site_names(&self) -> impl Iterator<Item = &str> {
        self.site_index.keys().map(String::as_str)
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.container_index.get(name).map(|idx| &self.containers[idx.0])
    }

    pub fn container_at(&self, index: ContainerIndex) -> &Container {
        &self.containers[index.0]
    }

    /// Every entry registered under a transformation name, in registration order.
    pub fn transformations_named(&self, name: &str) -> Vec<TransformationRef<'_>> {
        self.by_name
            .get(name)
            .map(|indices| indices.iter().map(|idx| self.transformation(*idx)).collect())
            .unwrap_or_default()
    }

    pub fn transformation(&self, index: TransformationIndex) -> TransformationRef<'_> {
        let resolved = &self.transformations[index.0];
        TransformationRef {
            index,
            transformation: &resolved.transformation,
            site: &self.sites[resolved.site.0],
            container: resolved
                .container
                .map(|idx| (idx, &self.containers[idx.0])),
        }
    }

    /// Replicas of a logical file, ordered by site name.
    pub fn replicas(&self, lfn: &str) -> &[ReplicaEntry] {
        self.replicas.get(lfn).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn replica(&self, lfn: &str, site: &str) -> Option<&ReplicaEntry> {
        self.replicas(lfn).iter().find(|r| r.site == site)
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.values().map(Vec::len).sum()
    }

    pub fn transformation_count(&self) -> usize {
        self.transformations.len()
    }

    /// The two reserved site identifiers.
    pub fn reserved_sites() -> [&'static str; 2] {
        [LOCAL_SITE, DEFAULT_POOL_SITE]
    }
}
