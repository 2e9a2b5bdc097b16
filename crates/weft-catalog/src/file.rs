//! Logical file identifiers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A file known by name only, independent of where it physically lives.
///
/// Jobs declare logical files as inputs and outputs; the planner maps them to
/// physical locations through the replica catalog or through the job that
/// produces them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalFile {
    name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl LogicalFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata key/value pair.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

impl fmt::Display for LogicalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for LogicalFile {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for LogicalFile {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&LogicalFile> for LogicalFile {
    fn from(file: &LogicalFile) -> Self {
        file.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_is_kept_but_not_serialized_when_empty() {
        let plain = LogicalFile::new("f.a");
        let json = serde_json::to_string(&plain).unwrap();
        assert_eq!(json, r#"{"name":"f.a"}"#);

        let tagged = LogicalFile::new("f.a").with_metadata("size", "1024");
        assert_eq!(tagged.metadata()["size"], "1024");
        assert_eq!(tagged.to_string(), "f.a");
    }
}
