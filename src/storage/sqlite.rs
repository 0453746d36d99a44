//! SQLite implementation of the record store
//!
//! A single connection behind a mutex; every operation is one short
//! critical section, which keeps the store safe under concurrent calls from
//! a task's workers.

use crate::config::{CrawlStrategy, TaskConfig, TaskSpec};
use crate::state::{FrontierState, TaskCounters, TaskLifecycle, UrlStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{RecordStore, StorageError, StorageResult};
use crate::storage::{
    ContentCategory, DepthCount, FileTypeCount, Page, StatusCount, TaskAnalysis, TaskRecord,
    TaskStats, UrlFilter, UrlOutcome, UrlPage, UrlRecord,
};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite-backed record store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const URL_RECORD_COLUMNS: &str = "id, task_id, url, depth, status, status_code, response_time, \
     file_size, content_type, title, author, description, keywords, publish_time, \
     error_message, created_at, completed_at";

const TASK_COLUMNS: &str = "id, name, seed_url, strategy, max_depth, worker_count, \
     request_interval, retry_times, respect_robots, allow_cross_domain, lifecycle, \
     frontier_state, progress, total_urls, completed_urls, failed_urls, success_rate, \
     total_bytes, avg_response_time, created_at, started_at, finished_at";

impl SqliteStore {
    /// Opens (or creates) the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory store, used by tests and ephemeral runs
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn map_url_row(row: &Row<'_>) -> rusqlite::Result<UrlRecord> {
        Ok(UrlRecord {
            id: row.get(0)?,
            task_id: row.get(1)?,
            url: row.get(2)?,
            depth: row.get::<_, i64>(3)? as u32,
            status: UrlStatus::from_db_string(&row.get::<_, String>(4)?)
                .unwrap_or(UrlStatus::Pending),
            status_code: row.get::<_, Option<i64>>(5)?.map(|code| code as u16),
            response_time: row.get(6)?,
            file_size: row.get::<_, Option<i64>>(7)?.map(|size| size as u64),
            content_type: row.get(8)?,
            title: row.get(9)?,
            author: row.get(10)?,
            description: row.get(11)?,
            keywords: row.get(12)?,
            publish_time: row.get(13)?,
            error_message: row.get(14)?,
            created_at: row.get(15)?,
            completed_at: row.get(16)?,
        })
    }

    fn map_task_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
        Ok(TaskRecord {
            config: TaskConfig {
                id: row.get(0)?,
                name: row.get(1)?,
                seed_url: row.get(2)?,
                strategy: CrawlStrategy::from_db_string(&row.get::<_, String>(3)?)
                    .unwrap_or_default(),
                max_depth: row.get::<_, i64>(4)? as u32,
                worker_count: row.get::<_, i64>(5)? as u32,
                request_interval: row.get(6)?,
                retry_times: row.get::<_, i64>(7)? as u32,
                respect_robots: row.get(8)?,
                allow_cross_domain: row.get(9)?,
            },
            lifecycle: TaskLifecycle::from_db_string(&row.get::<_, String>(10)?)
                .unwrap_or(TaskLifecycle::Pending),
            frontier_state: FrontierState::from_db_string(&row.get::<_, String>(11)?)
                .unwrap_or(FrontierState::Active),
            progress: row.get(12)?,
            total_urls: row.get::<_, i64>(13)? as u64,
            completed_urls: row.get::<_, i64>(14)? as u64,
            failed_urls: row.get::<_, i64>(15)? as u64,
            success_rate: row.get(16)?,
            total_bytes: row.get::<_, i64>(17)? as u64,
            avg_response_time: row.get(18)?,
            created_at: row.get(19)?,
            started_at: row.get(20)?,
            finished_at: row.get(21)?,
        })
    }
}

/// Builds the WHERE-clause suffix (beyond `task_id = ?1`) for a record
/// listing, returning the SQL fragment and its bound parameters
fn build_filter_clauses(filter: &UrlFilter) -> (String, Vec<Box<dyn ToSql>>) {
    let mut sql = String::new();
    let mut bindings: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(status) = filter.status {
        sql.push_str(" AND status = ?");
        bindings.push(Box::new(status.to_db_string()));
    }

    if let Some(prefix) = &filter.prefix {
        if prefix.starts_with("http://") || prefix.starts_with("https://") {
            sql.push_str(" AND url LIKE ?");
            bindings.push(Box::new(format!("{}%", prefix)));
        } else {
            // Bare host text: try both schemes plus a substring match
            sql.push_str(" AND (url LIKE ? OR url LIKE ? OR url LIKE ?)");
            bindings.push(Box::new(format!("https://{}%", prefix)));
            bindings.push(Box::new(format!("http://{}%", prefix)));
            bindings.push(Box::new(format!("%{}%", prefix)));
        }
    }

    if let Some(extension) = &filter.extension {
        sql.push_str(" AND url LIKE ?");
        bindings.push(Box::new(format!("%{}", extension)));
    }

    match &filter.category {
        Some(ContentCategory::Image) => {
            sql.push_str(" AND content_type LIKE 'image/%'");
        }
        Some(ContentCategory::Video) => {
            sql.push_str(" AND content_type LIKE 'video/%'");
        }
        Some(ContentCategory::Audio) => {
            sql.push_str(" AND content_type LIKE 'audio/%'");
        }
        Some(ContentCategory::Other) => {
            sql.push_str(
                " AND (content_type IS NULL OR (\
                 content_type NOT LIKE 'text/%' \
                 AND content_type NOT LIKE 'image/%' \
                 AND content_type NOT LIKE 'video/%' \
                 AND content_type NOT LIKE 'audio/%' \
                 AND content_type NOT IN ('application/pdf', 'application/javascript', \
                 'application/json', 'application/zip')))",
            );
        }
        Some(ContentCategory::Exact(content_type)) => {
            sql.push_str(" AND content_type = ?");
            bindings.push(Box::new(content_type.clone()));
        }
        None => {}
    }

    (sql, bindings)
}

impl RecordStore for SqliteStore {
    fn create_task(&self, spec: &TaskSpec) -> StorageResult<i64> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO tasks (name, seed_url, strategy, max_depth, worker_count, \
             request_interval, retry_times, respect_robots, allow_cross_domain, \
             lifecycle, frontier_state, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', 'active', ?10)",
            params![
                spec.name,
                spec.seed_url,
                spec.strategy.to_db_string(),
                spec.max_depth as i64,
                spec.worker_count as i64,
                spec.request_interval,
                spec.retry_times as i64,
                spec.respect_robots,
                spec.allow_cross_domain,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_task(&self, task_id: i64) -> StorageResult<Option<TaskRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS))?;
        let task = stmt
            .query_row(params![task_id], Self::map_task_row)
            .optional()?;
        Ok(task)
    }

    fn list_tasks(&self) -> StorageResult<Vec<TaskRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks ORDER BY created_at DESC, id DESC",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map([], Self::map_task_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn update_task(&self, config: &TaskConfig) -> StorageResult<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE tasks SET name = ?1, seed_url = ?2, strategy = ?3, max_depth = ?4, \
             worker_count = ?5, request_interval = ?6, retry_times = ?7, \
             respect_robots = ?8, allow_cross_domain = ?9 WHERE id = ?10",
            params![
                config.name,
                config.seed_url,
                config.strategy.to_db_string(),
                config.max_depth as i64,
                config.worker_count as i64,
                config.request_interval,
                config.retry_times as i64,
                config.respect_robots,
                config.allow_cross_domain,
                config.id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::TaskNotFound(config.id));
        }
        Ok(())
    }

    fn delete_task(&self, task_id: i64) -> StorageResult<()> {
        let conn = self.conn.lock();
        // Cascade is declared on the foreign key; the explicit delete keeps
        // the records gone even when the pragma is off for this connection.
        conn.execute("DELETE FROM url_records WHERE task_id = ?1", params![task_id])?;
        let deleted = conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;

        if deleted == 0 {
            return Err(StorageError::TaskNotFound(task_id));
        }
        Ok(())
    }

    fn update_lifecycle(&self, task_id: i64, lifecycle: TaskLifecycle) -> StorageResult<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();

        let updated = match lifecycle {
            TaskLifecycle::Running => conn.execute(
                "UPDATE tasks SET lifecycle = ?1, started_at = ?2, finished_at = NULL WHERE id = ?3",
                params![lifecycle.to_db_string(), now, task_id],
            )?,
            lifecycle if lifecycle.is_terminal() => conn.execute(
                "UPDATE tasks SET lifecycle = ?1, finished_at = ?2 WHERE id = ?3",
                params![lifecycle.to_db_string(), now, task_id],
            )?,
            _ => conn.execute(
                "UPDATE tasks SET lifecycle = ?1 WHERE id = ?2",
                params![lifecycle.to_db_string(), task_id],
            )?,
        };

        if updated == 0 {
            return Err(StorageError::TaskNotFound(task_id));
        }
        Ok(())
    }

    fn update_frontier_state(&self, task_id: i64, state: FrontierState) -> StorageResult<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE tasks SET frontier_state = ?1 WHERE id = ?2",
            params![state.to_db_string(), task_id],
        )?;

        if updated == 0 {
            return Err(StorageError::TaskNotFound(task_id));
        }
        Ok(())
    }

    fn update_task_counters(
        &self,
        task_id: i64,
        counters: &TaskCounters,
        queue_size: usize,
    ) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE tasks SET progress = ?1, total_urls = ?2, completed_urls = ?3, \
             failed_urls = ?4, success_rate = ?5, total_bytes = ?6, avg_response_time = ?7 \
             WHERE id = ?8",
            params![
                counters.progress(queue_size),
                counters.discovered as i64,
                counters.completed as i64,
                counters.failed as i64,
                counters.success_rate(),
                counters.total_bytes as i64,
                counters.avg_response_time(),
                task_id,
            ],
        )?;
        Ok(())
    }

    fn upsert_pending(&self, task_id: i64, url: &str, depth: u32) -> StorageResult<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO url_records (task_id, url, depth, status, created_at) \
             VALUES (?1, ?2, ?3, 'pending', ?4) \
             ON CONFLICT(task_id, url) DO UPDATE \
             SET depth = MIN(url_records.depth, excluded.depth)",
            params![task_id, url, depth as i64, now],
        )?;
        Ok(())
    }

    fn finalize(&self, task_id: i64, url: &str, outcome: &UrlOutcome) -> StorageResult<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();

        match outcome {
            UrlOutcome::Completed {
                status_code,
                response_time,
                file_size,
                content_type,
                meta,
            } => {
                conn.execute(
                    "INSERT INTO url_records (task_id, url, status, status_code, response_time, \
                     file_size, content_type, title, author, description, keywords, \
                     publish_time, error_message, created_at, completed_at) \
                     VALUES (?1, ?2, 'completed', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, ?12, ?12) \
                     ON CONFLICT(task_id, url) DO UPDATE SET \
                     status = 'completed', status_code = excluded.status_code, \
                     response_time = excluded.response_time, file_size = excluded.file_size, \
                     content_type = excluded.content_type, title = excluded.title, \
                     author = excluded.author, description = excluded.description, \
                     keywords = excluded.keywords, publish_time = excluded.publish_time, \
                     error_message = NULL, completed_at = excluded.completed_at",
                    params![
                        task_id,
                        url,
                        *status_code as i64,
                        response_time,
                        *file_size as i64,
                        content_type,
                        meta.title,
                        meta.author,
                        meta.description,
                        meta.keywords,
                        meta.publish_time,
                        now,
                    ],
                )?;
            }
            UrlOutcome::Failed {
                status_code,
                error_message,
            } => {
                conn.execute(
                    "INSERT INTO url_records (task_id, url, status, status_code, error_message, \
                     created_at, completed_at) \
                     VALUES (?1, ?2, 'failed', ?3, ?4, ?5, ?5) \
                     ON CONFLICT(task_id, url) DO UPDATE SET \
                     status = 'failed', status_code = excluded.status_code, \
                     error_message = excluded.error_message, \
                     completed_at = excluded.completed_at",
                    params![
                        task_id,
                        url,
                        status_code.map(|code| code as i64),
                        error_message,
                        now
                    ],
                )?;
            }
        }

        Ok(())
    }

    fn mark_robots_blocked(&self, task_id: i64, url: &str, depth: u32) -> StorageResult<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO url_records (task_id, url, depth, status, created_at, completed_at) \
             VALUES (?1, ?2, ?3, 'robots_blocked', ?4, ?4) \
             ON CONFLICT(task_id, url) DO UPDATE SET \
             status = 'robots_blocked', completed_at = excluded.completed_at",
            params![task_id, url, depth as i64, now],
        )?;
        Ok(())
    }

    fn list_urls(&self, task_id: i64, filter: &UrlFilter, page: Page) -> StorageResult<UrlPage> {
        let conn = self.conn.lock();
        let (clauses, bindings) = build_filter_clauses(filter);

        let page_number = page.page.max(1);
        let page_size = page.page_size.max(1);
        let offset = (page_number - 1) as i64 * page_size as i64;

        let total: i64 = {
            let sql = format!(
                "SELECT COUNT(*) FROM url_records WHERE task_id = ?1{}",
                clauses
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut all_params: Vec<&dyn ToSql> = vec![&task_id];
            all_params.extend(bindings.iter().map(|binding| binding.as_ref()));
            stmt.query_row(params_from_iter(all_params), |row| row.get(0))?
        };

        let records = {
            let sql = format!(
                "SELECT {} FROM url_records WHERE task_id = ?1{} \
                 ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
                URL_RECORD_COLUMNS, clauses, page_size, offset
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut all_params: Vec<&dyn ToSql> = vec![&task_id];
            all_params.extend(bindings.iter().map(|binding| binding.as_ref()));
            let rows = stmt
                .query_map(params_from_iter(all_params), Self::map_url_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        Ok(UrlPage {
            records,
            total: total as u64,
            page: page_number,
            page_size,
        })
    }

    fn aggregate_stats(&self, task_id: i64) -> StorageResult<TaskStats> {
        let conn = self.conn.lock();

        let file_types = {
            let mut stmt = conn.prepare(
                "SELECT content_type, COUNT(*), COALESCE(SUM(file_size), 0) \
                 FROM url_records WHERE task_id = ?1 AND status = 'completed' \
                 GROUP BY content_type ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt
                .query_map(params![task_id], |row| {
                    Ok(FileTypeCount {
                        content_type: row.get(0)?,
                        count: row.get::<_, i64>(1)? as u64,
                        total_size: row.get::<_, i64>(2)? as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let status_counts = {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM url_records WHERE task_id = ?1 GROUP BY status",
            )?;
            let rows = stmt
                .query_map(params![task_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .filter_map(|(status, count)| {
                    UrlStatus::from_db_string(&status).map(|status| StatusCount { status, count })
                })
                .collect()
        };

        let domain_count = {
            let mut stmt = conn.prepare("SELECT url FROM url_records WHERE task_id = ?1")?;
            let urls = stmt
                .query_map(params![task_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let hosts: std::collections::HashSet<String> = urls
                .iter()
                .filter_map(|url| crate::url::extract_host(url))
                .collect();
            hosts.len() as u64
        };

        Ok(TaskStats {
            file_types,
            status_counts,
            domain_count,
        })
    }

    fn analysis(&self, task_id: i64) -> StorageResult<TaskAnalysis> {
        let conn = self.conn.lock();

        let depth_distribution = {
            let mut stmt = conn.prepare(
                "SELECT depth, COUNT(*) FROM url_records \
                 WHERE task_id = ?1 AND status = 'completed' \
                 GROUP BY depth ORDER BY depth",
            )?;
            let rows = stmt
                .query_map(params![task_id], |row| {
                    Ok(DepthCount {
                        depth: row.get::<_, i64>(0)? as u32,
                        count: row.get::<_, i64>(1)? as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let size_distribution = {
            let mut stmt = conn.prepare(
                "SELECT CASE \
                    WHEN file_size < 1024 THEN 0 \
                    WHEN file_size < 10240 THEN 1 \
                    WHEN file_size < 102400 THEN 2 \
                    WHEN file_size < 1048576 THEN 3 \
                    ELSE 4 END AS bucket, COUNT(*) \
                 FROM url_records \
                 WHERE task_id = ?1 AND status = 'completed' AND file_size > 0 \
                 GROUP BY bucket",
            )?;
            let mut buckets = [0u64; 5];
            let rows = stmt.query_map(params![task_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (bucket, count) = row?;
                if (0..5).contains(&bucket) {
                    buckets[bucket as usize] = count as u64;
                }
            }
            buckets
        };

        let response_time_distribution = {
            let mut stmt = conn.prepare(
                "SELECT CASE \
                    WHEN response_time < 0.1 THEN 0 \
                    WHEN response_time < 0.5 THEN 1 \
                    WHEN response_time < 1.0 THEN 2 \
                    WHEN response_time < 5.0 THEN 3 \
                    ELSE 4 END AS bucket, COUNT(*) \
                 FROM url_records \
                 WHERE task_id = ?1 AND status = 'completed' AND response_time > 0 \
                 GROUP BY bucket",
            )?;
            let mut buckets = [0u64; 5];
            let rows = stmt.query_map(params![task_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (bucket, count) = row?;
                if (0..5).contains(&bucket) {
                    buckets[bucket as usize] = count as u64;
                }
            }
            buckets
        };

        Ok(TaskAnalysis {
            depth_distribution,
            size_distribution,
            response_time_distribution,
        })
    }

    fn export_records(&self, task_id: i64) -> StorageResult<Vec<UrlRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM url_records WHERE task_id = ?1 ORDER BY id",
            URL_RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![task_id], Self::map_url_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn terminal_urls(&self, task_id: i64) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT url FROM url_records WHERE task_id = ?1 AND status != 'pending'",
        )?;
        let urls = stmt
            .query_map(params![task_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(urls)
    }
}
