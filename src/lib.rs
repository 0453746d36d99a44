//! Crawld: a multi-tenant web crawl execution engine
//!
//! This crate implements the per-task crawl engine: a controllable worker
//! pool that walks outgoing links from a seed URL under depth and domain
//! constraints, persists per-URL outcomes, and exposes live telemetry.

pub mod config;
pub mod crawler;
pub mod frontier;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Task {0} not found")]
    TaskNotFound(i64),

    #[error("Task {0} is already running")]
    TaskAlreadyRunning(i64),

    #[error("Task {0} is running; stop it before modifying its configuration")]
    TaskRunning(i64),

    #[error("Invalid lifecycle transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::TaskLifecycle,
        to: state::TaskLifecycle,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal engine error: {0}")]
    Internal(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid seed URL: {0}")]
    InvalidSeedUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{CrawlStrategy, EngineConfig, TaskConfig};
pub use crawler::{Engine, TaskController};
pub use state::{FrontierState, TaskLifecycle, TaskSnapshot, UrlStatus, WorkerStatus};
pub use crate::url::normalize_url;
