//! Configuration system for the Weft workflow planner.
//!
//! Provides TOML-based configuration with:
//! - `[planner]` defaults for the execution, staging and output sites
//! - `[tracker]` polling, concurrency and retry settings
//! - `[logging]` level and optional JSON log directory
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigLayer, LayerKind, LoadedConfig, load_config, load_config_file,
    load_config_with_options, save_config, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
