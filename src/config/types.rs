use serde::{Deserialize, Serialize};

/// Process-level engine configuration, loaded from a TOML file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Address the API layer binds to
    pub bind_addr: String,

    /// Path to the SQLite database file
    pub database_path: String,

    /// Optional task definitions created at startup
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskSpec>,
}

/// Crawl ordering strategy for the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStrategy {
    /// FIFO: explore closest URLs first
    Breadth,
    /// LIFO: chase the most recently discovered links
    Depth,
    /// Rank by content-type guess from the URL extension
    Priority,
}

impl CrawlStrategy {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Breadth => "breadth",
            Self::Depth => "depth",
            Self::Priority => "priority",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "breadth" => Some(Self::Breadth),
            "depth" => Some(Self::Depth),
            "priority" => Some(Self::Priority),
            _ => None,
        }
    }
}

impl Default for CrawlStrategy {
    fn default() -> Self {
        Self::Breadth
    }
}

/// A task definition as written by a user (no id assigned yet)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskSpec {
    /// Human-readable task name shown in listings
    pub name: String,

    /// Absolute URL the crawl starts from (depth 0)
    pub seed_url: String,

    #[serde(default)]
    pub strategy: CrawlStrategy,

    /// Maximum link depth from the seed, in [1, 10]
    #[serde(default = "defaults::max_depth")]
    pub max_depth: u32,

    /// Number of concurrent workers, in [1, 10]
    #[serde(default = "defaults::worker_count")]
    pub worker_count: u32,

    /// Seconds each worker waits between consecutive fetches
    #[serde(default = "defaults::request_interval")]
    pub request_interval: f64,

    /// Retries for transient fetch failures
    #[serde(default = "defaults::retry_times")]
    pub retry_times: u32,

    #[serde(default = "defaults::respect_robots")]
    pub respect_robots: bool,

    #[serde(default)]
    pub allow_cross_domain: bool,
}

/// An immutable task configuration as stored, with its assigned id
///
/// Workers never observe a changed configuration: mutation is rejected while
/// a live controller exists, and a controller snapshots the config at start.
#[derive(Debug, Clone, Serialize)]
pub struct TaskConfig {
    pub id: i64,
    pub name: String,
    pub seed_url: String,
    pub strategy: CrawlStrategy,
    pub max_depth: u32,
    pub worker_count: u32,
    pub request_interval: f64,
    pub retry_times: u32,
    pub respect_robots: bool,
    pub allow_cross_domain: bool,
}

impl TaskConfig {
    /// Builds a stored config from a spec and an assigned id
    pub fn from_spec(id: i64, spec: TaskSpec) -> Self {
        Self {
            id,
            name: spec.name,
            seed_url: spec.seed_url,
            strategy: spec.strategy,
            max_depth: spec.max_depth,
            worker_count: spec.worker_count,
            request_interval: spec.request_interval,
            retry_times: spec.retry_times,
            respect_robots: spec.respect_robots,
            allow_cross_domain: spec.allow_cross_domain,
        }
    }
}

mod defaults {
    pub fn max_depth() -> u32 {
        3
    }

    pub fn worker_count() -> u32 {
        3
    }

    pub fn request_interval() -> f64 {
        1.0
    }

    pub fn retry_times() -> u32 {
        3
    }

    pub fn respect_robots() -> bool {
        true
    }
}
