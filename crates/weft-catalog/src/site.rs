//! Site descriptors: where jobs run and where files are kept.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::profile::{Namespace, Profiles};

/// Reserved identifier of the submit host.
pub const LOCAL_SITE: &str = "local";

/// Reserved identifier of the default execution pool.
pub const DEFAULT_POOL_SITE: &str = "condorpool";

/// CPU architecture constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86_64,
    Aarch64,
    Ppc64le,
}

/// Operating system constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsType {
    Linux,
    Macosx,
    Windows,
}

/// Purpose of a site directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryKind {
    /// Working space visible to running jobs.
    SharedScratch,
    /// Long-term storage for workflow outputs.
    LocalStorage,
}

/// Operations a file server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    All,
    Get,
    Put,
}

impl Operation {
    /// Whether a server declared with `self` may serve `requested`.
    pub fn permits(&self, requested: Operation) -> bool {
        matches!(self, Operation::All) || *self == requested
    }
}

/// An endpoint through which a directory is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileServer {
    /// Base URL mapping to the directory root.
    pub url: String,
    pub operation: Operation,
}

/// A directory on a site together with the servers exposing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub kind: DirectoryKind,
    pub path: PathBuf,
    #[serde(default)]
    pub file_servers: Vec<FileServer>,
}

impl Directory {
    pub fn new(kind: DirectoryKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            file_servers: Vec::new(),
        }
    }

    pub fn add_file_server(mut self, url: impl Into<String>, operation: Operation) -> Self {
        self.file_servers.push(FileServer {
            url: url.into(),
            operation,
        });
        self
    }

    /// This directory with a relative path resolved against `base`.
    pub fn anchored(&self, base: &Path) -> Directory {
        Directory {
            path: base.join(&self.path),
            ..self.clone()
        }
    }

    /// Base URL for `operation`.
    ///
    /// Uses the first file server permitting the operation, falling back to a
    /// `file://` URL of the directory path. A relative path must be
    /// [`anchored`](Directory::anchored) first to yield a usable URL.
    pub fn base_url(&self, operation: Operation) -> String {
        self.file_servers
            .iter()
            .find(|fs| fs.operation.permits(operation))
            .map(|fs| fs.url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("file://{}", self.path.display()))
    }

    /// URL of `name` inside this directory.
    pub fn file_url(&self, operation: Operation, name: &str) -> String {
        format!("{}/{}", self.base_url(operation), name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A named execution or storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    #[serde(default)]
    pub arch: Option<Arch>,
    #[serde(default)]
    pub os_type: Option<OsType>,
    #[serde(default)]
    pub directories: Vec<Directory>,
    #[serde(default)]
    pub profiles: Profiles,
}

impl Site {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch: None,
            os_type: None,
            directories: Vec::new(),
            profiles: Profiles::new(),
        }
    }

    /// Default descriptor for the submit host: `./scratch` and `./wf-output`.
    pub fn default_local() -> Self {
        Self::new(LOCAL_SITE)
            .add_directory(Directory::new(DirectoryKind::SharedScratch, "scratch"))
            .add_directory(Directory::new(DirectoryKind::LocalStorage, "wf-output"))
    }

    /// Default descriptor for the execution pool.
    pub fn default_pool() -> Self {
        Self::new(DEFAULT_POOL_SITE)
            .add_profile(Namespace::Pegasus, "style", "condor")
            .add_profile(Namespace::Condor, "universe", "vanilla")
    }

    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = Some(arch);
        self
    }

    pub fn with_os(mut self, os_type: OsType) -> Self {
        self.os_type = Some(os_type);
        self
    }

    pub fn add_directory(mut self, directory: Directory) -> Self {
        self.directories.push(directory);
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

    /// First directory of the given kind.
    pub fn directory(&self, kind: DirectoryKind) -> Option<&Directory> {
        self.directories.iter().find(|d| d.kind == kind)
    }

    /// Whether outputs can be persisted to this site.
    pub fn is_storage_capable(&self) -> bool {
        self.directory(DirectoryKind::LocalStorage).is_some()
    }
}
