//! Engine registry: the process-wide map from task id to live controller
//!
//! The registry is the only component the API layer talks to. It enforces
//! one live controller per task, removes controllers when their task reaches
//! a terminal lifecycle, and offers a forced eviction path for zombies.

use crate::config::{validate_task_spec, TaskConfig, TaskSpec};
use crate::crawler::controller::TaskController;
use crate::crawler::fetcher::{self, build_http_client, Download};
use crate::state::{FrontierState, TaskLifecycle, TaskSnapshot};
use crate::storage::{Page, RecordStore, TaskAnalysis, TaskRecord, TaskStats, UrlFilter, UrlPage, UrlRecord};
use crate::{CrawlError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use url::Url;

/// The crawl engine: task configuration CRUD plus controller lifecycle
pub struct Engine {
    store: Arc<dyn RecordStore>,
    client: reqwest::Client,
    tasks: Mutex<HashMap<i64, Arc<TaskController>>>,
}

impl Engine {
    pub fn new(store: Arc<dyn RecordStore>) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            store,
            client: build_http_client()?,
            tasks: Mutex::new(HashMap::new()),
        }))
    }

    // ===== Task configuration =====

    /// Validates and stores a task definition; no controller is spawned
    pub fn create_task(&self, spec: &TaskSpec) -> Result<i64> {
        validate_task_spec(spec)?;
        let id = self.store.create_task(spec)?;
        tracing::info!("Created task {}: {}", id, spec.name);
        Ok(id)
    }

    pub fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.store.list_tasks()?)
    }

    pub fn get_task(&self, task_id: i64) -> Result<TaskRecord> {
        self.store
            .get_task(task_id)?
            .ok_or(CrawlError::TaskNotFound(task_id))
    }

    /// Updates a task's configuration
    ///
    /// Rejected while a live controller exists: workers must never observe a
    /// changed configuration.
    pub fn update_task(&self, config: &TaskConfig) -> Result<()> {
        if self.live_controller(config.id).is_some() {
            return Err(CrawlError::TaskRunning(config.id));
        }

        let spec = TaskSpec {
            name: config.name.clone(),
            seed_url: config.seed_url.clone(),
            strategy: config.strategy,
            max_depth: config.max_depth,
            worker_count: config.worker_count,
            request_interval: config.request_interval,
            retry_times: config.retry_times,
            respect_robots: config.respect_robots,
            allow_cross_domain: config.allow_cross_domain,
        };
        validate_task_spec(&spec)?;

        self.store.update_task(config)?;
        tracing::info!("Updated task {}", config.id);
        Ok(())
    }

    /// Stops the task if live, then deletes its configuration and records
    pub async fn delete_task(&self, task_id: i64) -> Result<()> {
        if let Some(controller) = self.live_controller(task_id) {
            controller.stop().await?;
        }
        self.tasks.lock().remove(&task_id);

        self.store.delete_task(task_id)?;
        tracing::info!("Deleted task {}", task_id);
        Ok(())
    }

    // ===== Lifecycle commands =====

    /// Starts a task, refusing if a live controller already exists
    pub fn start_task(self: &Arc<Self>, task_id: i64) -> Result<()> {
        let record = self.get_task(task_id)?;

        let mut tasks = self.tasks.lock();
        if let Some(existing) = tasks.get(&task_id) {
            if existing.is_live() {
                return Err(CrawlError::TaskAlreadyRunning(task_id));
            }
            tasks.remove(&task_id);
        }

        // A fresh controller per start: it snapshots the configuration, so
        // edits made while the task was stopped take effect here
        let controller = Arc::new(TaskController::new(
            record.config,
            self.store.clone(),
            record.lifecycle,
        )?);

        // The hook only evicts the controller it was installed on; a stale
        // hook from a finished run must not remove a restarted successor
        let engine: Weak<Engine> = Arc::downgrade(self);
        let this_controller = Arc::downgrade(&controller);
        controller.set_on_terminal(move || {
            if let Some(engine) = engine.upgrade() {
                let mut tasks = engine.tasks.lock();
                let is_current = tasks
                    .get(&task_id)
                    .zip(this_controller.upgrade())
                    .map_or(false, |(current, hooked)| Arc::ptr_eq(current, &hooked));
                if is_current {
                    tasks.remove(&task_id);
                    tracing::debug!("Task {} removed from the registry", task_id);
                }
            }
        });

        controller.start()?;
        tasks.insert(task_id, controller);
        Ok(())
    }

    /// Pauses a live task's workers; for a dormant task only the stored
    /// lifecycle changes
    pub fn pause_task(&self, task_id: i64) -> Result<()> {
        match self.live_controller(task_id) {
            Some(controller) => controller.pause_workers(),
            None => {
                self.get_task(task_id)?;
                self.store
                    .update_lifecycle(task_id, TaskLifecycle::Paused)?;
                Ok(())
            }
        }
    }

    /// Resumes a paused task; a dormant task restarts from the seed
    pub fn resume_task(self: &Arc<Self>, task_id: i64) -> Result<()> {
        match self.live_controller(task_id) {
            Some(controller) => controller.resume_workers(),
            None => self.start_task(task_id),
        }
    }

    /// Stops a task; the stored lifecycle becomes `stopped` either way
    pub async fn stop_task(&self, task_id: i64) -> Result<()> {
        let controller = self.live_controller(task_id);
        match controller {
            Some(controller) => {
                controller.stop().await?;
                self.tasks.lock().remove(&task_id);
            }
            None => {
                self.get_task(task_id)?;
                self.store
                    .update_lifecycle(task_id, TaskLifecycle::Stopped)?;
            }
        }
        Ok(())
    }

    /// Pauses frontier growth; existing queued URLs keep draining
    pub fn pause_queue(&self, task_id: i64) -> Result<()> {
        match self.live_controller(task_id) {
            Some(controller) => controller.pause_frontier(),
            None => {
                self.get_task(task_id)?;
                self.store
                    .update_frontier_state(task_id, FrontierState::Paused)?;
                Ok(())
            }
        }
    }

    /// Restores frontier growth
    pub fn resume_queue(&self, task_id: i64) -> Result<()> {
        match self.live_controller(task_id) {
            Some(controller) => controller.resume_frontier(),
            None => {
                self.get_task(task_id)?;
                self.store
                    .update_frontier_state(task_id, FrontierState::Active)?;
                Ok(())
            }
        }
    }

    /// Stops every live task; used on engine shutdown
    pub async fn shutdown(&self) {
        let controllers: Vec<Arc<TaskController>> =
            self.tasks.lock().values().cloned().collect();
        for controller in controllers {
            if controller.is_live() {
                if let Err(e) = controller.stop().await {
                    tracing::warn!(
                        "Task {}: stop during shutdown failed: {}",
                        controller.task_id(),
                        e
                    );
                }
            }
        }
        self.tasks.lock().clear();
    }

    // ===== Introspection =====

    pub fn get_controller(&self, task_id: i64) -> Option<Arc<TaskController>> {
        self.tasks.lock().get(&task_id).cloned()
    }

    fn live_controller(&self, task_id: i64) -> Option<Arc<TaskController>> {
        self.tasks
            .lock()
            .get(&task_id)
            .filter(|controller| controller.is_live())
            .cloned()
    }

    /// Ids of tasks with a registered controller
    pub fn active_task_ids(&self) -> Vec<i64> {
        self.tasks.lock().keys().copied().collect()
    }

    /// Evicts a controller that failed to stop cleanly (zombie recovery)
    pub fn force_cleanup(&self, task_id: i64) -> bool {
        match self.tasks.lock().remove(&task_id) {
            Some(controller) => {
                controller.abandon();
                tracing::warn!("Force-cleaned task {} from the registry", task_id);
                true
            }
            None => false,
        }
    }

    /// The live snapshot for a task, or one reconstructed from the store's
    /// last-known numbers when no controller is live
    pub fn monitor(&self, task_id: i64) -> Result<TaskSnapshot> {
        if let Some(controller) = self.live_controller(task_id) {
            return Ok(controller.snapshot());
        }

        let record = self.get_task(task_id)?;
        Ok(TaskSnapshot {
            task_id,
            lifecycle: record.lifecycle,
            frontier_state: record.frontier_state,
            progress: record.progress,
            total_urls: record.total_urls,
            completed_urls: record.completed_urls,
            failed_urls: record.failed_urls,
            robots_blocked_urls: 0,
            cross_domain_blocked_urls: 0,
            depth_blocked_urls: 0,
            duplicate_urls: 0,
            queue_size: 0,
            success_rate: record.success_rate,
            total_bytes: record.total_bytes,
            avg_response_time: record.avg_response_time,
            workers: Vec::new(),
        })
    }

    // ===== Record queries (pass-through to the store) =====

    pub fn list_urls(&self, task_id: i64, filter: &UrlFilter, page: Page) -> Result<UrlPage> {
        self.get_task(task_id)?;
        Ok(self.store.list_urls(task_id, filter, page)?)
    }

    pub fn stats(&self, task_id: i64) -> Result<TaskStats> {
        self.get_task(task_id)?;
        Ok(self.store.aggregate_stats(task_id)?)
    }

    pub fn analysis(&self, task_id: i64) -> Result<TaskAnalysis> {
        self.get_task(task_id)?;
        Ok(self.store.analysis(task_id)?)
    }

    pub fn export(&self, task_id: i64) -> Result<Vec<UrlRecord>> {
        self.get_task(task_id)?;
        Ok(self.store.export_records(task_id)?)
    }

    /// Proxy-fetches a URL on behalf of a client, bypassing the engine
    pub async fn download(&self, url: &str) -> Result<Download> {
        let url = Url::parse(url).map_err(|e| crate::UrlError::Parse(e.to_string()))?;
        Ok(fetcher::download(&self.client, &url).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlStrategy;
    use crate::storage::SqliteStore;

    fn engine() -> Arc<Engine> {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        Engine::new(store).unwrap()
    }

    fn spec(name: &str, seed: &str) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            seed_url: seed.to_string(),
            strategy: CrawlStrategy::Breadth,
            max_depth: 2,
            worker_count: 1,
            request_interval: 0.0,
            retry_times: 0,
            respect_robots: false,
            allow_cross_domain: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_task() {
        let engine = engine();
        let id = engine.create_task(&spec("a", "https://site.test/")).unwrap();
        let record = engine.get_task(id).unwrap();
        assert_eq!(record.config.name, "a");
        assert_eq!(record.lifecycle, TaskLifecycle::Pending);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_spec() {
        let engine = engine();
        let mut bad = spec("bad", "https://site.test/");
        bad.max_depth = 99;
        assert!(matches!(
            engine.create_task(&bad),
            Err(CrawlError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_start_missing_task() {
        let engine = engine();
        assert!(matches!(
            engine.start_task(7),
            Err(CrawlError::TaskNotFound(7))
        ));
    }

    #[tokio::test]
    async fn test_start_refuses_live_duplicate() {
        let engine = engine();
        let id = engine
            .create_task(&spec("dup", "http://127.0.0.1:1/"))
            .unwrap();

        engine.start_task(id).unwrap();
        assert!(matches!(
            engine.start_task(id),
            Err(CrawlError::TaskAlreadyRunning(_))
        ));

        engine.stop_task(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_refused_while_live() {
        let engine = engine();
        let id = engine
            .create_task(&spec("locked", "http://127.0.0.1:1/"))
            .unwrap();
        engine.start_task(id).unwrap();

        let mut config = engine.get_task(id).unwrap().config;
        config.max_depth = 5;
        assert!(matches!(
            engine.update_task(&config),
            Err(CrawlError::TaskRunning(_))
        ));

        engine.stop_task(id).await.unwrap();
        engine.update_task(&config).unwrap();
        assert_eq!(engine.get_task(id).unwrap().config.max_depth, 5);
    }

    #[tokio::test]
    async fn test_stop_removes_controller() {
        let engine = engine();
        let id = engine
            .create_task(&spec("s", "http://127.0.0.1:1/"))
            .unwrap();

        engine.start_task(id).unwrap();
        assert!(engine.get_controller(id).is_some());

        engine.stop_task(id).await.unwrap();
        assert!(engine.get_controller(id).is_none());
        assert_eq!(
            engine.get_task(id).unwrap().lifecycle,
            TaskLifecycle::Stopped
        );
    }

    #[tokio::test]
    async fn test_pause_dormant_task_updates_store() {
        let engine = engine();
        let id = engine.create_task(&spec("p", "https://site.test/")).unwrap();

        engine.pause_task(id).unwrap();
        assert_eq!(
            engine.get_task(id).unwrap().lifecycle,
            TaskLifecycle::Paused
        );
    }

    #[tokio::test]
    async fn test_queue_toggle_dormant_task() {
        let engine = engine();
        let id = engine.create_task(&spec("q", "https://site.test/")).unwrap();

        engine.pause_queue(id).unwrap();
        assert_eq!(
            engine.get_task(id).unwrap().frontier_state,
            FrontierState::Paused
        );

        engine.resume_queue(id).unwrap();
        assert_eq!(
            engine.get_task(id).unwrap().frontier_state,
            FrontierState::Active
        );
    }

    #[tokio::test]
    async fn test_force_cleanup() {
        let engine = engine();
        let id = engine
            .create_task(&spec("z", "http://127.0.0.1:1/"))
            .unwrap();

        assert!(!engine.force_cleanup(id));
        engine.start_task(id).unwrap();
        assert!(engine.force_cleanup(id));
        assert!(engine.get_controller(id).is_none());
    }

    #[tokio::test]
    async fn test_monitor_dormant_task_uses_store() {
        let engine = engine();
        let id = engine.create_task(&spec("m", "https://site.test/")).unwrap();

        let snapshot = engine.monitor(id).unwrap();
        assert_eq!(snapshot.task_id, id);
        assert_eq!(snapshot.lifecycle, TaskLifecycle::Pending);
        assert!(snapshot.workers.is_empty());
    }

    #[tokio::test]
    async fn test_delete_task_cascades() {
        let engine = engine();
        let id = engine.create_task(&spec("d", "https://site.test/")).unwrap();

        engine.delete_task(id).await.unwrap();
        assert!(matches!(
            engine.get_task(id),
            Err(CrawlError::TaskNotFound(_))
        ));
    }
}
