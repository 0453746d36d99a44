//! Runtime state definitions for tasks, workers, and URL records
//!
//! This module defines the task lifecycle state machine, the independent
//! frontier toggle, per-URL record statuses, per-worker telemetry, and the
//! aggregate counters that feed monitoring snapshots.

use serde::Serialize;

/// Task-level lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLifecycle {
    /// Task configuration exists but no controller has started it
    Pending,

    /// Workers are actively draining the frontier
    Running,

    /// Workers have settled after their current URL and are blocked
    Paused,

    /// Task was stopped manually; workers released
    Stopped,

    /// Frontier drained with no in-flight URLs
    Completed,

    /// The engine hit an unrecoverable error (store failure, invariant violation)
    Failed,
}

impl TaskLifecycle {
    /// Returns true if the task has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }

    /// Returns true if a controller is actively driving the task
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Returns true if `start()` is a valid command from this state
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Stopped | Self::Completed | Self::Failed
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "stopped" => Some(Self::Stopped),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Independent toggle controlling whether link discoveries enter the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontierState {
    Active,
    Paused,
}

impl FrontierState {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Status of a single URL record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    /// Enqueued in the frontier, not yet fetched
    Pending,

    /// Fetched and recorded successfully
    Completed,

    /// Fetch failed after exhausting retries
    Failed,

    /// Disallowed by robots.txt; recorded for visibility, never fetched
    RobotsBlocked,
}

impl UrlStatus {
    /// Terminal records stay in the seen-set across restarts
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RobotsBlocked => "robots_blocked",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "robots_blocked" => Some(Self::RobotsBlocked),
            _ => None,
        }
    }
}

/// Status of a single worker in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Fetching,
    Paused,
    Error,
    Stopped,
}

/// Per-worker telemetry, written only by the owning worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerState {
    pub status: WorkerStatus,
    pub current_url: String,
    pub completed: u64,
    pub failed: u64,
    pub bytes: u64,
}

impl WorkerState {
    pub fn new() -> Self {
        Self {
            status: WorkerStatus::Idle,
            current_url: String::new(),
            completed: 0,
            failed: 0,
            bytes: 0,
        }
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate counters for one task, mutated under a single short-held lock
#[derive(Debug, Clone, Default)]
pub struct TaskCounters {
    /// URLs accepted into the frontier (includes the seed)
    pub discovered: u64,
    pub completed: u64,
    pub failed: u64,
    pub robots_blocked: u64,
    pub cross_domain_blocked: u64,
    pub depth_blocked: u64,
    /// Rejected re-offers plus malformed URLs that never entered the frontier
    pub duplicate: u64,
    pub total_bytes: u64,
    /// Sum and sample count for averaging response times
    pub response_time_sum: f64,
    pub response_samples: u64,
}

impl TaskCounters {
    /// URLs that reached a completed or failed record
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    pub fn success_rate(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            0.0
        } else {
            self.completed as f64 / processed as f64 * 100.0
        }
    }

    pub fn avg_response_time(&self) -> f64 {
        if self.response_samples == 0 {
            0.0
        } else {
            self.response_time_sum / self.response_samples as f64
        }
    }

    /// Progress as processed over discovered; a drained queue reports 100%
    pub fn progress(&self, queue_size: usize) -> f64 {
        if queue_size == 0 {
            if self.discovered > 0 {
                100.0
            } else {
                0.0
            }
        } else {
            self.processed() as f64 / self.discovered.max(1) as f64 * 100.0
        }
    }
}

/// A consistent point-in-time read of one task's runtime state
///
/// Served to the telemetry consumer; counters and per-worker state are read
/// under the same locks the workers write through.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: i64,
    pub lifecycle: TaskLifecycle,
    pub frontier_state: FrontierState,
    pub progress: f64,
    pub total_urls: u64,
    pub completed_urls: u64,
    pub failed_urls: u64,
    pub robots_blocked_urls: u64,
    pub cross_domain_blocked_urls: u64,
    pub depth_blocked_urls: u64,
    pub duplicate_urls: u64,
    pub queue_size: usize,
    pub success_rate: f64,
    pub total_bytes: u64,
    pub avg_response_time: f64,
    pub workers: Vec<WorkerState>,
}
