//! Validation of engine and task configuration
//!
//! Invalid configuration is rejected before a controller ever sees it.

use crate::config::{EngineConfig, TaskSpec};
use crate::{ConfigError, ConfigResult};
use url::Url;

/// Bounds on `max_depth` (the seed is depth 0)
pub const MAX_DEPTH_RANGE: (u32, u32) = (1, 10);

/// Bounds on `worker_count`
pub const WORKER_COUNT_RANGE: (u32, u32) = (1, 10);

/// Validates an entire engine configuration
pub fn validate_engine_config(config: &EngineConfig) -> ConfigResult<()> {
    if config.bind_addr.trim().is_empty() {
        return Err(ConfigError::Validation("bind-addr must not be empty".into()));
    }

    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-path must not be empty".into(),
        ));
    }

    for spec in &config.tasks {
        validate_task_spec(spec)?;
    }

    Ok(())
}

/// Validates a single task definition
pub fn validate_task_spec(spec: &TaskSpec) -> ConfigResult<()> {
    if spec.name.trim().is_empty() {
        return Err(ConfigError::Validation("task name must not be empty".into()));
    }

    validate_seed_url(&spec.seed_url)?;

    let (min_depth, max_depth) = MAX_DEPTH_RANGE;
    if spec.max_depth < min_depth || spec.max_depth > max_depth {
        return Err(ConfigError::Validation(format!(
            "max-depth {} out of range [{}, {}]",
            spec.max_depth, min_depth, max_depth
        )));
    }

    let (min_workers, max_workers) = WORKER_COUNT_RANGE;
    if spec.worker_count < min_workers || spec.worker_count > max_workers {
        return Err(ConfigError::Validation(format!(
            "worker-count {} out of range [{}, {}]",
            spec.worker_count, min_workers, max_workers
        )));
    }

    if !spec.request_interval.is_finite() || spec.request_interval < 0.0 {
        return Err(ConfigError::Validation(format!(
            "request-interval {} must be a non-negative number of seconds",
            spec.request_interval
        )));
    }

    Ok(())
}

/// Checks that the seed is an absolute HTTP(S) URL with a host
fn validate_seed_url(seed: &str) -> ConfigResult<()> {
    let url =
        Url::parse(seed).map_err(|e| ConfigError::InvalidSeedUrl(format!("{}: {}", seed, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidSeedUrl(format!(
            "{}: only http and https seeds are supported",
            seed
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidSeedUrl(format!("{}: missing host", seed)));
    }

    Ok(())
}
