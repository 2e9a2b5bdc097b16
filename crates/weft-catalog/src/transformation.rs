//! Transformation and container catalog entries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::profile::{Namespace, Profiles};
use crate::site::{Arch, OsType};

/// Container runtime flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Docker,
    Singularity,
    Shifter,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Docker => "docker",
            Self::Singularity => "singularity",
            Self::Shifter => "shifter",
        })
    }
}

/// A container image that transformations can run inside.
///
/// Containers are shared by reference: any number of transformations may
/// name the same container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub kind: ContainerKind,
    /// Image locator, e.g. `docker://centos:7` or a `file://` path.
    pub image: String,
    /// Site the image is fetched from, when it is not a registry URL.
    #[serde(default)]
    pub image_site: Option<String>,
    /// Host paths bound into the container (`src:dest`).
    #[serde(default)]
    pub mounts: Vec<String>,
    #[serde(default)]
    pub profiles: Profiles,
}

impl Container {
    pub fn new(name: impl Into<String>, kind: ContainerKind, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            image: image.into(),
            image_site: None,
            mounts: Vec::new(),
            profiles: Profiles::new(),
        }
    }

    pub fn with_image_site(mut self, site: impl Into<String>) -> Self {
        self.image_site = Some(site.into());
        self
    }

    pub fn add_mount(mut self, mount: impl Into<String>) -> Self {
        self.mounts.push(mount.into());
        self
    }

    pub fn add_profile(
        mut self,
        namespace: Namespace,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.profiles.insert(namespace, key, value);
        self
    }
}

/// How to invoke an executable on a particular site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation {
    /// Logical executable name jobs refer to.
    pub name: String,
    /// Site where `pfn` is valid.
    pub site: String,
    /// Physical path (or URL, when stageable) of the executable.
    pub pfn: String,
    /// Whether the executable must be transferred to the execution site.
    #[serde(default)]
    pub is_stageable: bool,
    /// Name of the container to run inside, if any.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub arch: Option<Arch>,
    #[serde(default)]
    pub os_type: Option<OsType>,
    #[serde(default)]
    pub profiles: Profiles,
}

impl Transformation {
    pub fn new(name: impl Into<String>, site: impl Into<String>, pfn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            site: site.into(),
            pfn: pfn.into(),
            is_stageable: false,
            container: None,
            arch: None,
            os_type: None,
            profiles: Profiles::new(),
        }
    }

    pub fn stageable(mut self, is_stageable: bool) -> Self {
        self.is_stageable = is_stageable;
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = Some(arch);
        self
    }

    pub fn with_os(mut self, os_type: OsType) -> Self {
        self.os_type = Some(os_type);
        self
    }

    pub fn add_profile(
        mut self,
        namespace: Namespace,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.profiles.insert(namespace, key, value);
        self
    }

    /// Whether this entry can run on a site with the given platform.
    ///
    /// A constraint only excludes the site when both sides declare a value
    /// and the values differ.
    pub fn runs_on(&self, arch: Option<Arch>, os_type: Option<OsType>) -> bool {
        let arch_ok = match (self.arch, arch) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        };
        let os_ok = match (self.os_type, os_type) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        };
        arch_ok && os_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_on_constraints() {
        let tr = Transformation::new("findrange", "condorpool", "/usr/bin/findrange")
            .with_arch(Arch::X86_64)
            .with_os(OsType::Linux);

        assert!(tr.runs_on(Some(Arch::X86_64), Some(OsType::Linux)));
        assert!(tr.runs_on(None, None));
        assert!(!tr.runs_on(Some(Arch::Aarch64), Some(OsType::Linux)));
        assert!(!tr.runs_on(Some(Arch::X86_64), Some(OsType::Macosx)));
    }

    #[test]
    fn test_builder() {
        let tr = Transformation::new("preprocess", "local", "file:///opt/bin/preprocess")
            .stageable(true)
            .with_container("centos-base")
            .add_profile(Namespace::Pegasus, "memory", "2048");
        assert!(tr.is_stageable);
        assert_eq!(tr.container.as_deref(), Some("centos-base"));
        assert_eq!(tr.profiles.get(Namespace::Pegasus, "memory"), Some("2048"));

        let c = Container::new("centos-base", ContainerKind::Singularity, "docker://centos:7")
            .add_mount("/data:/data");
        assert_eq!(c.kind.to_string(), "singularity");
        assert_eq!(c.mounts, vec!["/data:/data"]);
    }
}
