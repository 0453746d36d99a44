//! Configuration loading and validation
//!
//! The engine is configured by a single TOML file holding the bind address,
//! the database path, and optional task definitions.

mod types;
mod validation;

pub use types::{CrawlStrategy, EngineConfig, TaskConfig, TaskSpec};
pub use validation::{validate_engine_config, validate_task_spec};

use crate::ConfigResult;
use std::path::Path;

/// Loads and validates an engine configuration from a TOML file
pub fn load_config(path: &Path) -> ConfigResult<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&content)?;
    validate_engine_config(&config)?;
    Ok(config)
}
