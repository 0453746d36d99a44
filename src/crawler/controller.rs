//! Per-task controller
//!
//! Owns the frontier, the robots cache, the worker pool, the counters, and
//! the lifecycle state machine for one task. Commands are atomic with
//! respect to the lifecycle; workers observe control changes through a
//! watch channel at loop heads and blocking-call timeouts.

use crate::config::TaskConfig;
use crate::crawler::fetcher::{build_http_client, USER_AGENT};
use crate::crawler::worker;
use crate::frontier::Frontier;
use crate::robots::RobotsCache;
use crate::state::{
    FrontierState, TaskCounters, TaskLifecycle, TaskSnapshot, WorkerState, WorkerStatus,
};
use crate::storage::RecordStore;
use crate::url::normalize_url;
use crate::{CrawlError, Result, UrlError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

/// Control signal workers observe between URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Running,
    Paused,
    Stopping,
}

/// Grace period for workers to settle on stop; beyond it they are abandoned
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Cadence of the completion reaper and counter flush
const REAPER_TICK: Duration = Duration::from_millis(500);

/// State shared between the controller, its workers, and the reaper
pub(crate) struct TaskShared {
    pub config: TaskConfig,
    pub seed: Url,
    pub frontier: Frontier,
    pub robots: RobotsCache,
    pub store: Arc<dyn RecordStore>,
    pub client: reqwest::Client,
    pub counters: Mutex<TaskCounters>,
    pub worker_states: Mutex<Vec<WorkerState>>,
    pub lifecycle: Mutex<TaskLifecycle>,
    pub control: watch::Sender<RunState>,
    /// URLs taken from the frontier but not yet terminal
    pub in_flight: AtomicUsize,
    /// Bumped on every start; stale reapers from a previous run exit on
    /// mismatch
    pub epoch: AtomicU64,
    /// Invoked once when the task reaches a terminal lifecycle (registry
    /// self-cleanup)
    pub on_terminal: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl TaskShared {
    /// Mutates one worker's telemetry slot
    pub fn with_worker<F>(&self, index: usize, mutate: F)
    where
        F: FnOnce(&mut WorkerState),
    {
        let mut states = self.worker_states.lock();
        if let Some(state) = states.get_mut(index) {
            mutate(state);
        }
    }

    /// Drives the task to `failed` after an unrecoverable error, preserving
    /// records
    pub fn fail(&self, reason: &str) {
        tracing::error!("Task {} failed: {}", self.config.id, reason);
        *self.lifecycle.lock() = TaskLifecycle::Failed;
        if let Err(e) = self
            .store
            .update_lifecycle(self.config.id, TaskLifecycle::Failed)
        {
            tracing::error!(
                "Task {}: could not persist failed lifecycle: {}",
                self.config.id,
                e
            );
        }
        self.control.send_replace(RunState::Stopping);
        self.frontier.close();
    }

    /// A consistent read of counters, per-worker state, lifecycle, and
    /// frontier state
    pub fn snapshot(&self) -> TaskSnapshot {
        let counters = self.counters.lock().clone();
        let queue_size = self.frontier.size();
        let workers = self.worker_states.lock().clone();
        let lifecycle = *self.lifecycle.lock();
        let frontier_state = if self.frontier.is_paused() {
            FrontierState::Paused
        } else {
            FrontierState::Active
        };

        TaskSnapshot {
            task_id: self.config.id,
            lifecycle,
            frontier_state,
            progress: counters.progress(queue_size),
            total_urls: counters.discovered,
            completed_urls: counters.completed,
            failed_urls: counters.failed,
            robots_blocked_urls: counters.robots_blocked,
            cross_domain_blocked_urls: counters.cross_domain_blocked,
            depth_blocked_urls: counters.depth_blocked,
            duplicate_urls: counters.duplicate,
            queue_size,
            success_rate: counters.success_rate(),
            total_bytes: counters.total_bytes,
            avg_response_time: counters.avg_response_time(),
            workers,
        }
    }
}

/// The per-task controller
pub struct TaskController {
    shared: Arc<TaskShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl TaskController {
    /// Builds a controller around an immutable configuration snapshot
    ///
    /// `stored_lifecycle` is the last persisted lifecycle; a live value left
    /// behind by a crashed process maps to `stopped` so the task can start.
    pub fn new(
        config: TaskConfig,
        store: Arc<dyn RecordStore>,
        stored_lifecycle: TaskLifecycle,
    ) -> Result<Self> {
        let seed = normalize_url(&config.seed_url)?;
        let seed_host = seed
            .host_str()
            .ok_or(UrlError::MissingHost)?
            .to_string();

        let client = build_http_client()?;
        let robots = RobotsCache::new(client.clone(), USER_AGENT.to_string());
        let frontier = Frontier::new(
            config.strategy,
            config.max_depth,
            config.allow_cross_domain,
            seed_host,
        );

        let lifecycle = if stored_lifecycle.is_live() {
            TaskLifecycle::Stopped
        } else {
            stored_lifecycle
        };

        let (control, _) = watch::channel(RunState::Stopping);
        let worker_count = config.worker_count as usize;

        let shared = Arc::new(TaskShared {
            config,
            seed,
            frontier,
            robots,
            store,
            client,
            counters: Mutex::new(TaskCounters::default()),
            worker_states: Mutex::new(vec![WorkerState::new(); worker_count]),
            lifecycle: Mutex::new(lifecycle),
            control,
            in_flight: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            on_terminal: Mutex::new(None),
        });

        Ok(Self {
            shared,
            workers: Mutex::new(Vec::new()),
            reaper: Mutex::new(None),
        })
    }

    pub fn task_id(&self) -> i64 {
        self.shared.config.id
    }

    pub fn lifecycle(&self) -> TaskLifecycle {
        *self.shared.lifecycle.lock()
    }

    pub fn is_live(&self) -> bool {
        self.lifecycle().is_live()
    }

    /// Registers the hook invoked once when the task reaches a terminal
    /// lifecycle
    pub fn set_on_terminal<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.shared.on_terminal.lock() = Some(Box::new(hook));
    }

    /// Starts (or restarts) the task
    ///
    /// Valid from `pending`, `stopped`, `failed`, and `completed`. Runtime
    /// state resets; existing URL records are preserved and their terminal
    /// URLs rehydrate the seen-set, so a restart re-fetches only the seed
    /// and drains discovery as duplicates.
    pub fn start(&self) -> Result<()> {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if !lifecycle.can_start() {
                return Err(CrawlError::InvalidTransition {
                    from: *lifecycle,
                    to: TaskLifecycle::Running,
                });
            }
            *lifecycle = TaskLifecycle::Running;
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        // Reclaim handles from any previous run; they have already exited
        // or will observe the stop signal they were left with
        for handle in self.workers.lock().drain(..) {
            handle.abort();
        }
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }

        let task_id = self.shared.config.id;
        let worker_count = self.shared.config.worker_count as usize;

        self.shared.frontier.reset();
        *self.shared.counters.lock() = TaskCounters::default();
        *self.shared.worker_states.lock() = vec![WorkerState::new(); worker_count];
        self.shared.in_flight.store(0, Ordering::SeqCst);

        let terminal = self.shared.store.terminal_urls(task_id)?;
        self.shared.frontier.mark_seen(terminal);

        self.shared
            .store
            .upsert_pending(task_id, self.shared.seed.as_str(), 0)?;
        self.shared.frontier.seed(self.shared.seed.clone());
        self.shared.counters.lock().discovered = 1;

        self.shared
            .store
            .update_lifecycle(task_id, TaskLifecycle::Running)?;
        self.shared
            .store
            .update_frontier_state(task_id, FrontierState::Active)?;

        self.shared.control.send_replace(RunState::Running);

        let mut workers = self.workers.lock();
        for index in 0..worker_count {
            workers.push(tokio::spawn(worker::run_worker(index, self.shared.clone())));
        }
        drop(workers);

        *self.reaper.lock() = Some(tokio::spawn(run_reaper(self.shared.clone(), epoch)));

        tracing::info!(
            "Task {} started: {} workers, seed {}",
            task_id,
            worker_count,
            self.shared.seed
        );
        Ok(())
    }

    /// Pauses the workers; each settles after its current URL
    pub fn pause_workers(&self) -> Result<()> {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if *lifecycle != TaskLifecycle::Running {
                return Err(CrawlError::InvalidTransition {
                    from: *lifecycle,
                    to: TaskLifecycle::Paused,
                });
            }
            *lifecycle = TaskLifecycle::Paused;
        }

        self.shared.control.send_replace(RunState::Paused);
        self.shared
            .store
            .update_lifecycle(self.task_id(), TaskLifecycle::Paused)?;
        tracing::info!("Task {} paused", self.task_id());
        Ok(())
    }

    /// Resumes paused workers
    pub fn resume_workers(&self) -> Result<()> {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if *lifecycle != TaskLifecycle::Paused {
                return Err(CrawlError::InvalidTransition {
                    from: *lifecycle,
                    to: TaskLifecycle::Running,
                });
            }
            *lifecycle = TaskLifecycle::Running;
        }

        self.shared.control.send_replace(RunState::Running);
        self.shared
            .store
            .update_lifecycle(self.task_id(), TaskLifecycle::Running)?;
        tracing::info!("Task {} resumed", self.task_id());
        Ok(())
    }

    /// Stops the task, joining workers within a bounded grace period
    ///
    /// Workers are not required to abort an in-flight request; fetches carry
    /// a hard timeout, and past the grace period they are abandoned.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if !lifecycle.is_live() {
                return Err(CrawlError::InvalidTransition {
                    from: *lifecycle,
                    to: TaskLifecycle::Stopped,
                });
            }
            *lifecycle = TaskLifecycle::Stopped;
        }

        self.shared.control.send_replace(RunState::Stopping);
        self.shared.frontier.close();
        self.shared
            .store
            .update_lifecycle(self.task_id(), TaskLifecycle::Stopped)?;

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(STOP_GRACE, join_all).await.is_err() {
            tracing::warn!(
                "Task {}: workers did not settle within {:?}, abandoning in-flight responses",
                self.task_id(),
                STOP_GRACE
            );
        }

        // Best-effort final state for abandoned workers
        for state in self.shared.worker_states.lock().iter_mut() {
            state.status = WorkerStatus::Stopped;
            state.current_url.clear();
        }

        flush_counters(&self.shared);
        tracing::info!("Task {} stopped", self.task_id());
        Ok(())
    }

    /// Stops frontier growth without touching the lifecycle
    pub fn pause_frontier(&self) -> Result<()> {
        self.shared.frontier.pause();
        self.shared
            .store
            .update_frontier_state(self.task_id(), FrontierState::Paused)?;
        tracing::info!("Task {} frontier paused, discovery disabled", self.task_id());
        Ok(())
    }

    /// Restores frontier growth
    pub fn resume_frontier(&self) -> Result<()> {
        self.shared.frontier.resume();
        self.shared
            .store
            .update_frontier_state(self.task_id(), FrontierState::Active)?;
        tracing::info!("Task {} frontier resumed, discovery enabled", self.task_id());
        Ok(())
    }

    /// Best-effort release for zombie recovery: signals stop and marks the
    /// task stopped without waiting for workers to settle
    pub fn abandon(&self) {
        let was_live = {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.is_live() {
                *lifecycle = TaskLifecycle::Stopped;
                true
            } else {
                false
            }
        };

        self.shared.control.send_replace(RunState::Stopping);
        self.shared.frontier.close();

        if was_live {
            if let Err(e) = self
                .shared
                .store
                .update_lifecycle(self.task_id(), TaskLifecycle::Stopped)
            {
                tracing::warn!(
                    "Task {}: could not persist stop during abandon: {}",
                    self.task_id(),
                    e
                );
            }
        }
    }

    /// Current queue depth
    pub fn queue_size(&self) -> usize {
        self.shared.frontier.size()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.shared.snapshot()
    }
}

/// Completion reaper: flushes counters every tick and transitions
/// `running -> completed` after two consecutive drained observations
async fn run_reaper(shared: Arc<TaskShared>, epoch: u64) {
    let mut idle_checks = 0u32;

    loop {
        tokio::time::sleep(REAPER_TICK).await;

        if shared.epoch.load(Ordering::SeqCst) != epoch {
            return; // superseded by a restart
        }

        let lifecycle = *shared.lifecycle.lock();
        if lifecycle.is_terminal() {
            break;
        }

        flush_counters(&shared);

        let drained = lifecycle == TaskLifecycle::Running
            && shared.frontier.is_empty()
            && shared.in_flight.load(Ordering::SeqCst) == 0;

        if drained {
            idle_checks += 1;
            if idle_checks >= 2 {
                let completed = {
                    let mut lifecycle = shared.lifecycle.lock();
                    if *lifecycle == TaskLifecycle::Running {
                        *lifecycle = TaskLifecycle::Completed;
                        true
                    } else {
                        false
                    }
                };

                if completed {
                    shared.control.send_replace(RunState::Stopping);
                    shared.frontier.close();
                    if let Err(e) = shared
                        .store
                        .update_lifecycle(shared.config.id, TaskLifecycle::Completed)
                    {
                        tracing::error!(
                            "Task {}: could not persist completion: {}",
                            shared.config.id,
                            e
                        );
                    }
                    tracing::info!("Task {} completed: frontier drained", shared.config.id);
                }
                break;
            }
        } else {
            idle_checks = 0;
        }
    }

    flush_counters(&shared);

    let hook = shared.on_terminal.lock().take();
    if let Some(hook) = hook {
        hook();
    }
}

/// Writes last-known aggregate counters onto the task row
fn flush_counters(shared: &TaskShared) {
    let counters = shared.counters.lock().clone();
    let queue_size = shared.frontier.size();
    if let Err(e) = shared
        .store
        .update_task_counters(shared.config.id, &counters, queue_size)
    {
        tracing::warn!(
            "Task {}: failed to flush counters: {}",
            shared.config.id,
            e
        );
    }
}
