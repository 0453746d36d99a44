//! The storage trait the engine is written against

use crate::config::{TaskConfig, TaskSpec};
use crate::state::{FrontierState, TaskCounters, TaskLifecycle};
use crate::storage::{Page, TaskAnalysis, TaskRecord, TaskStats, UrlFilter, UrlOutcome, UrlPage, UrlRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Narrow interface over the durable store
///
/// Implementations must be safe under concurrent calls from multiple workers
/// of the same task. All URL upserts are idempotent on `(task_id, url)`.
pub trait RecordStore: Send + Sync {
    // ===== Task configurations =====

    /// Creates a task configuration and returns its assigned id
    fn create_task(&self, spec: &TaskSpec) -> StorageResult<i64>;

    /// Gets one task with its last-known runtime columns
    fn get_task(&self, task_id: i64) -> StorageResult<Option<TaskRecord>>;

    /// Lists all tasks, newest first
    fn list_tasks(&self) -> StorageResult<Vec<TaskRecord>>;

    /// Replaces a task's configuration fields
    ///
    /// The caller (the registry) must have verified no live controller
    /// exists; storage does not re-check.
    fn update_task(&self, config: &TaskConfig) -> StorageResult<()>;

    /// Deletes a task configuration; URL records cascade
    fn delete_task(&self, task_id: i64) -> StorageResult<()>;

    /// Persists a lifecycle transition, stamping started_at / finished_at
    fn update_lifecycle(&self, task_id: i64, lifecycle: TaskLifecycle) -> StorageResult<()>;

    /// Persists the frontier toggle so it survives a controller restart
    fn update_frontier_state(&self, task_id: i64, state: FrontierState) -> StorageResult<()>;

    /// Flushes last-known aggregate counters onto the task row
    fn update_task_counters(
        &self,
        task_id: i64,
        counters: &TaskCounters,
        queue_size: usize,
    ) -> StorageResult<()>;

    // ===== URL records =====

    /// Records a URL as pending at enqueue time
    ///
    /// Idempotent: re-upserting keeps the existing record, retaining the
    /// shortest known depth.
    fn upsert_pending(&self, task_id: i64, url: &str, depth: u32) -> StorageResult<()>;

    /// Commits a URL's final state (completed or failed)
    fn finalize(&self, task_id: i64, url: &str, outcome: &UrlOutcome) -> StorageResult<()>;

    /// Records a robots-disallowed URL so it is visible in listings
    fn mark_robots_blocked(&self, task_id: i64, url: &str, depth: u32) -> StorageResult<()>;

    /// Paginated, filtered record listing
    fn list_urls(&self, task_id: i64, filter: &UrlFilter, page: Page) -> StorageResult<UrlPage>;

    /// Aggregated counts by content type, status, and domain
    fn aggregate_stats(&self, task_id: i64) -> StorageResult<TaskStats>;

    /// Bucketed depth / size / response-time distributions
    fn analysis(&self, task_id: i64) -> StorageResult<TaskAnalysis>;

    /// All records for a task, for export
    fn export_records(&self, task_id: i64) -> StorageResult<Vec<UrlRecord>>;

    /// URLs in terminal states, used to rehydrate the seen-set on restart
    fn terminal_urls(&self, task_id: i64) -> StorageResult<Vec<String>>;
}
