//! Crawld command-line entry point
//!
//! Runs the crawl engine against a TOML configuration: task definitions are
//! created and driven to completion, with stats and export modes for
//! inspecting a previous run's database.

use clap::Parser;
use crawld::config::load_config;
use crawld::storage::{RecordStore, SqliteStore};
use crawld::{Engine, TaskLifecycle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Crawld: a multi-tenant web crawl execution engine
#[derive(Parser, Debug)]
#[command(name = "crawld")]
#[command(version)]
#[command(about = "Multi-tenant web crawl execution engine", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the configuration and show what would run, without crawling
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    dry_run: bool,

    /// Show stored statistics for all tasks and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export"])]
    stats: bool,

    /// Print all URL records of one task as JSON and exit
    #[arg(long, value_name = "TASK_ID", conflicts_with_all = ["dry_run", "stats"])]
    export: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from {}", cli.config.display());
    let config = load_config(&cli.config)?;

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let store = Arc::new(SqliteStore::new(Path::new(&config.database_path))?);

    if cli.stats {
        handle_stats(store.as_ref())?;
    } else if let Some(task_id) = cli.export {
        handle_export(store.as_ref(), task_id)?;
    } else {
        handle_run(&config, store).await?;
    }

    Ok(())
}

fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crawld=info,warn"),
            1 => EnvFilter::new("crawld=debug,info"),
            2 => EnvFilter::new("crawld=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Validates the config and prints what would run
fn handle_dry_run(config: &crawld::EngineConfig) {
    println!("=== Crawld Dry Run ===\n");
    println!("Bind address: {}", config.bind_addr);
    println!("Database: {}", config.database_path);
    println!("\nTasks ({}):", config.tasks.len());

    for task in &config.tasks {
        println!(
            "  - {} ({}, depth {}, {} workers, {:.1}s interval)",
            task.name,
            task.seed_url,
            task.max_depth,
            task.worker_count,
            task.request_interval
        );
    }

    println!("\n✓ Configuration is valid");
}

/// Prints the stored task list with last-known aggregates
fn handle_stats(store: &dyn RecordStore) -> crawld::Result<()> {
    let tasks = store.list_tasks()?;

    if tasks.is_empty() {
        println!("No tasks in the database.");
        return Ok(());
    }

    for task in tasks {
        println!(
            "#{} {} [{}]: {} discovered, {} completed, {} failed, {} bytes, {:.1}% success",
            task.config.id,
            task.config.name,
            task.lifecycle.to_db_string(),
            task.total_urls,
            task.completed_urls,
            task.failed_urls,
            task.total_bytes,
            task.success_rate,
        );

        let stats = store.aggregate_stats(task.config.id)?;
        for file_type in stats.file_types {
            println!(
                "    {:<30} {:>6} records, {} bytes",
                file_type.content_type.unwrap_or_else(|| "(none)".to_string()),
                file_type.count,
                file_type.total_size
            );
        }
    }

    Ok(())
}

/// Prints a task's records as JSON
fn handle_export(store: &dyn RecordStore, task_id: i64) -> Result<(), Box<dyn std::error::Error>> {
    let records = store.export_records(task_id)?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

/// Creates the configured tasks and drives them to a terminal lifecycle
async fn handle_run(
    config: &crawld::EngineConfig,
    store: Arc<SqliteStore>,
) -> crawld::Result<()> {
    let engine = Engine::new(store)?;

    if config.tasks.is_empty() {
        tracing::warn!("No tasks defined in the configuration; nothing to do");
        return Ok(());
    }

    let mut task_ids = Vec::new();
    for spec in &config.tasks {
        let id = engine.create_task(spec)?;
        engine.start_task(id)?;
        task_ids.push(id);
    }

    // Wait for every task to reach a terminal lifecycle
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut all_done = true;
        for &id in &task_ids {
            let snapshot = engine.monitor(id)?;
            if !snapshot.lifecycle.is_terminal() {
                all_done = false;
            }
        }
        if all_done {
            break;
        }
    }

    for &id in &task_ids {
        let snapshot = engine.monitor(id)?;
        let ok = snapshot.lifecycle == TaskLifecycle::Completed;
        println!(
            "{} task {}: {} completed, {} failed, {} bytes ({:.1}% success)",
            if ok { "✓" } else { "✗" },
            id,
            snapshot.completed_urls,
            snapshot.failed_urls,
            snapshot.total_bytes,
            snapshot.success_rate,
        );
    }

    engine.shutdown().await;
    Ok(())
}
