//! Error types for catalog validation.

use std::fmt;

use thiserror::Error;

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// A single problem found while finalizing a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogViolation {
    /// The same site name was registered twice.
    DuplicateSite { site: String },
    /// The same container name was registered twice.
    DuplicateContainer { container: String },
    /// The same transformation was registered twice for one site.
    DuplicateTransformation { name: String, site: String },
    /// More than one replica for the same (file, site) pair.
    DuplicateReplica { lfn: String, site: String },
    /// A site name is referenced but never registered.
    UnknownSite { site: String, referenced_by: String },
    /// A transformation references a container that was never registered.
    UnknownContainer {
        container: String,
        transformation: String,
        site: String,
    },
}

impl fmt::Display for CatalogViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateSite { site } => write!(f, "site '{site}' is defined more than once"),
            Self::DuplicateContainer { container } => {
                write!(f, "container '{container}' is defined more than once")
            }
            Self::DuplicateTransformation { name, site } => write!(
                f,
                "transformation '{name}' is defined more than once for site '{site}'"
            ),
            Self::DuplicateReplica { lfn, site } => write!(
                f,
                "file '{lfn}' has more than one replica on site '{site}'"
            ),
            Self::UnknownSite {
                site,
                referenced_by,
            } => write!(f, "{referenced_by} references unknown site '{site}'"),
            Self::UnknownContainer {
                container,
                transformation,
                site,
            } => write!(
                f,
                "transformation '{transformation}' on site '{site}' references unknown container '{container}'"
            ),
        }
    }
}

/// Errors that can occur while building a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// One or more cross-references failed validation. Every violation found
    /// is listed, not just the first.
    #[error("catalog validation failed with {} violation(s):{}", .violations.len(), render(.violations))]
    Validation { violations: Vec<CatalogViolation> },
}

impl CatalogError {
    /// The violations carried by this error.
    pub fn violations(&self) -> &[CatalogViolation] {
        match self {
            Self::Validation { violations } => violations,
        }
    }
}

fn render(violations: &[CatalogViolation]) -> String {
    violations.iter().map(|v| format!("\n  - {v}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_lists_every_violation() {
        let err = CatalogError::Validation {
            violations: vec![
                CatalogViolation::DuplicateSite {
                    site: "local".into(),
                },
                CatalogViolation::UnknownContainer {
                    container: "centos-base".into(),
                    transformation: "preprocess".into(),
                    site: "condorpool".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 violation(s)"));
        assert!(msg.contains("site 'local' is defined more than once"));
        assert!(msg.contains("unknown container 'centos-base'"));
    }
}
