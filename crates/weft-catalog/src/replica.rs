//! Replica catalog entries.

use serde::{Deserialize, Serialize};

/// One physical copy of a logical file on a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaEntry {
    /// Logical file name.
    pub lfn: String,
    /// Site holding the copy.
    pub site: String,
    /// Physical location (path or URL).
    pub pfn: String,
}

impl ReplicaEntry {
    pub fn new(site: impl Into<String>, lfn: impl Into<String>, pfn: impl Into<String>) -> Self {
        Self {
            lfn: lfn.into(),
            site: site.into(),
            pfn: pfn.into(),
        }
    }
}
