//! SQLite schema for tasks and URL records

use rusqlite::Connection;

/// Creates tables and indexes if they do not exist
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            seed_url TEXT NOT NULL,
            strategy TEXT NOT NULL DEFAULT 'breadth',
            max_depth INTEGER NOT NULL DEFAULT 3,
            worker_count INTEGER NOT NULL DEFAULT 3,
            request_interval REAL NOT NULL DEFAULT 1.0,
            retry_times INTEGER NOT NULL DEFAULT 3,
            respect_robots INTEGER NOT NULL DEFAULT 1,
            allow_cross_domain INTEGER NOT NULL DEFAULT 0,
            lifecycle TEXT NOT NULL DEFAULT 'pending',
            frontier_state TEXT NOT NULL DEFAULT 'active',
            progress REAL NOT NULL DEFAULT 0.0,
            total_urls INTEGER NOT NULL DEFAULT 0,
            completed_urls INTEGER NOT NULL DEFAULT 0,
            failed_urls INTEGER NOT NULL DEFAULT 0,
            success_rate REAL NOT NULL DEFAULT 0.0,
            total_bytes INTEGER NOT NULL DEFAULT 0,
            avg_response_time REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        );

        CREATE TABLE IF NOT EXISTS url_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            depth INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            status_code INTEGER,
            response_time REAL,
            file_size INTEGER,
            content_type TEXT,
            title TEXT,
            author TEXT,
            description TEXT,
            keywords TEXT,
            publish_time TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            UNIQUE (task_id, url)
        );

        CREATE INDEX IF NOT EXISTS idx_url_records_task
            ON url_records(task_id);
        CREATE INDEX IF NOT EXISTS idx_url_records_status
            ON url_records(status);
        CREATE INDEX IF NOT EXISTS idx_url_records_content_type
            ON url_records(content_type);
    ",
    )
}
