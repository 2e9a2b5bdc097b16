//! Configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Root configuration structure.
///
/// Maps to the full TOML config file. All sections are optional so that
/// partial configs (e.g., project-local overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeftConfig {
    /// Planner site defaults.
    pub planner: Option<PlannerSection>,

    /// Execution tracker settings.
    pub tracker: Option<TrackerSection>,

    /// Logging settings.
    pub logging: Option<LoggingSection>,
}

impl WeftConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: WeftConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: WeftConfig) {
        if other.planner.is_some() {
            self.planner = other.planner;
        }

        if other.tracker.is_some() {
            self.tracker = other.tracker;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Planner section, or defaults when absent.
    pub fn planner(&self) -> PlannerSection {
        self.planner.clone().unwrap_or_default()
    }

    /// Tracker section, or defaults when absent.
    pub fn tracker(&self) -> TrackerSection {
        self.tracker.clone().unwrap_or_default()
    }

    /// Logging section, or defaults when absent.
    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        if let Some(ref tracker) = self.tracker {
            if tracker.max_concurrent_tasks == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "tracker.max_concurrent_tasks".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            if tracker.poll_interval_ms == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "tracker.poll_interval_ms".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Planner Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Site defaults used when planning a workflow.
///
/// ```toml
/// [planner]
/// execution_site = "condorpool"
/// staging_site = "local"
/// output_site = "local"
/// input_sites = []
/// stage_out = true
/// base_dir = "/home/wf"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// Site where compute tasks run.
    pub execution_site: String,
    /// Site whose shared scratch holds intermediate files.
    pub staging_site: String,
    /// Site that receives staged-out outputs.
    pub output_site: String,
    /// Sites allowed to serve input replicas. Empty means every site.
    pub input_sites: Vec<String>,
    /// Whether stage-out tasks are emitted at all.
    pub stage_out: bool,
    /// Directory that relative site directories resolve against. Defaults
    /// to the working directory of the planning process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            execution_site: "condorpool".to_string(),
            staging_site: "local".to_string(),
            output_site: "local".to_string(),
            input_sites: Vec::new(),
            stage_out: true,
            base_dir: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracker Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Execution tracker configuration.
///
/// ```toml
/// [tracker]
/// poll_interval_ms = 500
/// max_concurrent_tasks = 8
/// backend_retries = 3
/// backend_backoff_ms = 200
/// task_retries = 0
/// runs_dir = "runs"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    /// Interval between backend status polls.
    pub poll_interval_ms: u64,
    /// Maximum number of tasks running at once.
    pub max_concurrent_tasks: usize,
    /// Retries for transient backend communication errors.
    pub backend_retries: u32,
    /// Initial backoff between backend retries; doubles per attempt.
    pub backend_backoff_ms: u64,
    /// Automatic resubmissions of a task that exited non-zero. 0 means only
    /// explicit restarts re-run failed tasks.
    pub task_retries: u32,
    /// Directory holding one subdirectory per run.
    pub runs_dir: PathBuf,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_concurrent_tasks: 8,
            backend_retries: 3,
            backend_backoff_ms: 200,
            task_retries: 0,
            runs_dir: PathBuf::from("runs"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration.
///
/// ```toml
/// [logging]
/// level = "info"
/// json_dir = "logs"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rotated JSON log files. Console only when unset.
    pub json_dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = WeftConfig::from_toml("").unwrap();
        assert!(config.planner.is_none());
        assert!(config.tracker.is_none());
        assert_eq!(config.tracker(), TrackerSection::default());
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let config = WeftConfig::from_toml(
            r#"
[tracker]
task_retries = 2

[planner]
execution_site = "hpc"
input_sites = ["local", "archive"]
"#,
        )
        .unwrap();

        let tracker = config.tracker();
        assert_eq!(tracker.task_retries, 2);
        assert_eq!(tracker.poll_interval_ms, 500);
        assert_eq!(tracker.runs_dir, PathBuf::from("runs"));

        let planner = config.planner();
        assert_eq!(planner.execution_site, "hpc");
        assert_eq!(planner.staging_site, "local");
        assert_eq!(planner.input_sites, vec!["local", "archive"]);
        assert!(planner.stage_out);
        assert_eq!(planner.base_dir, None);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = WeftConfig::from_toml("[tracker]\nmax_concurrent_tasks = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "tracker.max_concurrent_tasks"));
    }

    #[test]
    fn test_merge_overrides_present_sections() {
        let mut base = WeftConfig::from_toml(
            r#"
[planner]
execution_site = "condorpool"

[logging]
level = "debug"
"#,
        )
        .unwrap();
        let overlay = WeftConfig::from_toml("[planner]\nexecution_site = \"hpc\"\n").unwrap();

        base.merge(overlay);

        assert_eq!(base.planner().execution_site, "hpc");
        assert_eq!(base.logging().level, "debug");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = WeftConfig {
            planner: Some(PlannerSection::default()),
            tracker: Some(TrackerSection {
                max_concurrent_tasks: 2,
                ..Default::default()
            }),
            logging: Some(LoggingSection {
                level: "warn".to_string(),
                json_dir: Some(PathBuf::from("logs")),
            }),
        };

        let text = config.to_toml().unwrap();
        let parsed = WeftConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
