//! Locating and layering `weft.toml` files.
//!
//! Two layers are read, the second overriding the first section by section:
//!
//! | Layer   | Location                                                   |
//! |---------|------------------------------------------------------------|
//! | user    | `$WEFT_CONFIG_DIR/config.toml`, else `<config dir>/weft/config.toml` |
//! | project | `<project dir>/weft.toml`                                  |
//!
//! A layer that exists but fails to parse is skipped with a warning rather
//! than aborting startup.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, WeftConfig};

const PROJECT_FILE: &str = "weft.toml";
const USER_FILE: &str = "config.toml";
const CONFIG_DIR_ENV: &str = "WEFT_CONFIG_DIR";

/// Which layer a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    User,
    Project,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::User => f.write_str("user"),
            LayerKind::Project => f.write_str("project"),
        }
    }
}

/// One candidate config file and whether it contributed.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub kind: LayerKind,
    pub path: PathBuf,
    pub loaded: bool,
}

/// Merged configuration plus how it was assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: WeftConfig,
    /// Candidate layers, lowest precedence first.
    pub layers: Vec<ConfigLayer>,
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Files that were actually merged.
    pub fn loaded_from(&self) -> impl Iterator<Item = &Path> {
        self.layers
            .iter()
            .filter(|l| l.loaded)
            .map(|l| l.path.as_path())
    }
}

/// Discover and merge the user and project layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], with `user_dir` replacing the user config
/// directory lookup.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    user_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let user = match user_dir {
        Some(dir) => Some(dir.join(USER_FILE)),
        None => user_config_path(),
    };
    let project = project_dir.unwrap_or(Path::new(".")).join(PROJECT_FILE);

    let candidates = user
        .map(|p| (LayerKind::User, p))
        .into_iter()
        .chain(std::iter::once((LayerKind::Project, project)));

    let mut loaded = LoadedConfig {
        config: WeftConfig::new(),
        layers: Vec::new(),
        warnings: Vec::new(),
    };
    for (kind, path) in candidates {
        let mut merged = false;
        if path.is_file() {
            match load_config_file(&path) {
                Ok(layer) => {
                    loaded.config.merge(layer);
                    merged = true;
                }
                Err(e) => loaded
                    .warnings
                    .push(format!("ignoring {kind} config {}: {e}", path.display())),
            }
        }
        loaded.layers.push(ConfigLayer {
            kind,
            path,
            loaded: merged,
        });
    }
    Ok(loaded)
}

/// Read and parse a single file.
pub fn load_config_file(path: &Path) -> Result<WeftConfig> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    WeftConfig::from_toml(&text)
}

/// Write `config` to `path`, creating missing directories.
pub fn save_config(config: &WeftConfig, path: &Path) -> Result<()> {
    let write_err = |p: &Path, source| ConfigError::WriteFile {
        path: p.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }
    fs::write(path, config.to_toml()?).map_err(|e| write_err(path, e))
}

/// `config.toml` inside [`user_config_dir`].
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_FILE))
}

/// `$WEFT_CONFIG_DIR` when set and non-empty, otherwise `weft/` under the
/// platform config directory.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join("weft")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
