//! Durable storage for task configurations and per-URL records
//!
//! The engine talks to storage only through the narrow [`RecordStore`]
//! trait; the SQLite implementation lives behind it. All URL upserts are
//! idempotent on the `(task_id, url)` key, and a URL's final state is
//! committed before the task's counters reflect it.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{RecordStore, StorageError, StorageResult};

use crate::config::TaskConfig;
use crate::state::{FrontierState, TaskLifecycle, UrlStatus};
use serde::Serialize;

/// One row of the url_records table
#[derive(Debug, Clone, Serialize)]
pub struct UrlRecord {
    pub id: i64,
    pub task_id: i64,
    pub url: String,
    pub depth: u32,
    pub status: UrlStatus,
    pub status_code: Option<u16>,
    pub response_time: Option<f64>,
    pub file_size: Option<u64>,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub publish_time: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// A stored task configuration plus its last-known runtime columns
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    #[serde(flatten)]
    pub config: TaskConfig,
    pub lifecycle: TaskLifecycle,
    pub frontier_state: FrontierState,
    pub progress: f64,
    pub total_urls: u64,
    pub completed_urls: u64,
    pub failed_urls: u64,
    pub success_rate: f64,
    pub total_bytes: u64,
    pub avg_response_time: f64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// Extracted document metadata carried into a completed record
#[derive(Debug, Clone, Default)]
pub struct DocumentMeta {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub publish_time: Option<String>,
}

/// Final outcome of processing one URL
#[derive(Debug, Clone)]
pub enum UrlOutcome {
    Completed {
        status_code: u16,
        response_time: f64,
        file_size: u64,
        content_type: String,
        meta: DocumentMeta,
    },
    Failed {
        /// Last HTTP status observed, when the failure was an HTTP error
        status_code: Option<u16>,
        error_message: String,
    },
}

/// Content-type category filter for record listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCategory {
    Image,
    Video,
    Audio,
    /// Anything that is not text, image, video, audio, or a common
    /// application type
    Other,
    /// Exact content-type match
    Exact(String),
}

/// Filters for the paginated record listing
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    pub status: Option<UrlStatus>,
    /// URL prefix; bare host text matches both schemes plus substrings
    pub prefix: Option<String>,
    /// URL suffix, e.g. ".pdf"
    pub extension: Option<String>,
    pub category: Option<ContentCategory>,
}

/// Pagination window, 1-based
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
        }
    }
}

/// One page of the record listing
#[derive(Debug, Clone, Serialize)]
pub struct UrlPage {
    pub records: Vec<UrlRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Count and byte volume for one content type
#[derive(Debug, Clone, Serialize)]
pub struct FileTypeCount {
    pub content_type: Option<String>,
    pub count: u64,
    pub total_size: u64,
}

/// Count for one record status
#[derive(Debug, Clone, Serialize)]
pub struct StatusCount {
    pub status: UrlStatus,
    pub count: u64,
}

/// Aggregated per-task statistics for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct TaskStats {
    pub file_types: Vec<FileTypeCount>,
    pub status_counts: Vec<StatusCount>,
    pub domain_count: u64,
}

/// Count of completed records at one depth
#[derive(Debug, Clone, Serialize)]
pub struct DepthCount {
    pub depth: u32,
    pub count: u64,
}

/// Bucketed distributions for the analysis endpoint
///
/// Size buckets: <1 KiB, <10 KiB, <100 KiB, <1 MiB, larger.
/// Response-time buckets: <0.1 s, <0.5 s, <1 s, <5 s, slower.
#[derive(Debug, Clone, Serialize)]
pub struct TaskAnalysis {
    pub depth_distribution: Vec<DepthCount>,
    pub size_distribution: [u64; 5],
    pub response_time_distribution: [u64; 5],
}
