//! Worker: the fetch-parse-record loop
//!
//! Each worker runs until the stop signal: poll the frontier, honor robots,
//! wait out the per-worker request spacing, fetch, extract links and
//! metadata, and commit the URL's record before the task counters move.
//! Cancellation is cooperative, checked at the loop head and on poll
//! timeouts; in-flight requests are bounded by the fetch timeout.

use crate::crawler::controller::{RunState, TaskShared};
use crate::crawler::extract;
use crate::crawler::fetcher::{self, FetchOutcome, RetryPolicy};
use crate::frontier::{FrontierEntry, Offer};
use crate::state::WorkerStatus;
use crate::storage::{DocumentMeta, StorageResult, UrlOutcome};
use crate::url::normalize_url;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Short frontier poll so idle workers keep observing control changes
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// The worker loop, one spawned task per worker index
pub(crate) async fn run_worker(index: usize, shared: Arc<TaskShared>) {
    tracing::debug!("Worker {} started for task {}", index, shared.config.id);

    let mut control = shared.control.subscribe();
    let retry = RetryPolicy::new(shared.config.retry_times);
    let interval = Duration::from_secs_f64(shared.config.request_interval.max(0.0));
    let mut last_fetch: Option<Instant> = None;

    loop {
        if wait_for_run(&mut control, &shared, index).await == RunState::Stopping {
            break;
        }

        let Some(entry) = shared.frontier.poll(POLL_TIMEOUT).await else {
            shared.with_worker(index, |state| {
                state.status = WorkerStatus::Idle;
                state.current_url.clear();
            });
            continue;
        };

        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = process_url(&shared, index, &retry, interval, &mut last_fetch, entry).await;
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = result {
            // The store failed twice on a commit; the task cannot make
            // trustworthy progress
            shared.with_worker(index, |state| state.status = WorkerStatus::Error);
            shared.fail(&format!("worker {} store error: {}", index, e));
            break;
        }
    }

    shared.with_worker(index, |state| {
        state.status = WorkerStatus::Stopped;
        state.current_url.clear();
    });
    tracing::debug!("Worker {} stopped for task {}", index, shared.config.id);
}

/// Blocks while paused; returns the state that should drive the next step
async fn wait_for_run(
    control: &mut watch::Receiver<RunState>,
    shared: &TaskShared,
    index: usize,
) -> RunState {
    loop {
        let state = *control.borrow_and_update();
        match state {
            RunState::Running => return RunState::Running,
            RunState::Stopping => return RunState::Stopping,
            RunState::Paused => {
                shared.with_worker(index, |worker| {
                    worker.status = WorkerStatus::Paused;
                    worker.current_url.clear();
                });
                if control.changed().await.is_err() {
                    return RunState::Stopping;
                }
            }
        }
    }
}

/// Processes one dequeued URL through robots, spacing, fetch, extraction,
/// and record commit
async fn process_url(
    shared: &TaskShared,
    index: usize,
    retry: &RetryPolicy,
    interval: Duration,
    last_fetch: &mut Option<Instant>,
    entry: FrontierEntry,
) -> StorageResult<()> {
    let FrontierEntry { url, depth } = entry;
    let task_id = shared.config.id;

    if shared.config.respect_robots && !shared.robots.can_fetch(&url).await {
        tracing::info!("URL blocked by robots.txt: {}", url);
        with_store_retry(|| shared.store.mark_robots_blocked(task_id, url.as_str(), depth))?;
        shared.counters.lock().robots_blocked += 1;
        return Ok(());
    }

    // Per-worker spacing between consecutive fetches
    if let Some(last) = *last_fetch {
        let since = last.elapsed();
        if since < interval {
            tokio::time::sleep(interval - since).await;
        }
    }

    shared.with_worker(index, |state| {
        state.status = WorkerStatus::Fetching;
        state.current_url = url.to_string();
    });

    let outcome = fetcher::fetch_url(&shared.client, &url, retry).await;
    *last_fetch = Some(Instant::now());

    match outcome {
        FetchOutcome::Success(page) => {
            // A redirect target is fetched under this entry; mark it seen so
            // it is not crawled a second time through a direct link
            if page.final_url != url {
                if let Ok(final_normalized) = normalize_url(page.final_url.as_str()) {
                    shared
                        .frontier
                        .mark_seen([final_normalized.as_str().to_string()]);
                }
            }

            let mut meta = DocumentMeta::default();
            if let Some(body) = page.body.as_deref() {
                let extracted = extract::extract(body, &page.final_url);
                discover_links(shared, depth, &extracted.links)?;
                meta = DocumentMeta {
                    title: extracted.title,
                    author: extracted.author,
                    description: extracted.description,
                    keywords: extracted.keywords,
                    publish_time: extracted.publish_time,
                };
            }

            // Commit the record before the counters reflect it
            with_store_retry(|| {
                shared.store.finalize(
                    task_id,
                    url.as_str(),
                    &UrlOutcome::Completed {
                        status_code: page.status_code,
                        response_time: page.elapsed,
                        file_size: page.file_size,
                        content_type: page.content_type.clone(),
                        meta: meta.clone(),
                    },
                )
            })?;

            {
                let mut counters = shared.counters.lock();
                counters.completed += 1;
                counters.total_bytes += page.file_size;
                counters.response_time_sum += page.elapsed;
                counters.response_samples += 1;
            }
            shared.with_worker(index, |state| {
                state.status = WorkerStatus::Idle;
                state.current_url.clear();
                state.completed += 1;
                state.bytes += page.file_size;
            });
        }
        FetchOutcome::Failure { status_code, error } => {
            tracing::warn!("Fetch failed for {}: {}", url, error);

            with_store_retry(|| {
                shared.store.finalize(
                    task_id,
                    url.as_str(),
                    &UrlOutcome::Failed {
                        status_code,
                        error_message: error.clone(),
                    },
                )
            })?;

            {
                let mut counters = shared.counters.lock();
                counters.failed += 1;
            }
            shared.with_worker(index, |state| {
                state.status = WorkerStatus::Idle;
                state.current_url.clear();
                state.failed += 1;
            });
        }
    }

    Ok(())
}

/// Normalizes and offers discovered links, keeping the counters in step with
/// each offer outcome
fn discover_links(shared: &TaskShared, depth: u32, links: &[String]) -> StorageResult<()> {
    let next_depth = depth + 1;
    let task_id = shared.config.id;

    for link in links {
        let normalized = match normalize_url(link) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("Discarding malformed link {}: {}", link, e);
                shared.counters.lock().duplicate += 1;
                continue;
            }
        };

        match shared.frontier.offer(&normalized, next_depth) {
            Offer::Accepted => {
                with_store_retry(|| {
                    shared
                        .store
                        .upsert_pending(task_id, normalized.as_str(), next_depth)
                })?;
                shared.counters.lock().discovered += 1;
            }
            Offer::Duplicate => shared.counters.lock().duplicate += 1,
            Offer::DepthBlocked => shared.counters.lock().depth_blocked += 1,
            Offer::CrossDomainBlocked => shared.counters.lock().cross_domain_blocked += 1,
            // Dropped silently while the frontier is paused
            Offer::FrontierPaused => {}
        }
    }

    Ok(())
}

/// Retries a store operation once before giving up
fn with_store_retry<F>(mut op: F) -> StorageResult<()>
where
    F: FnMut() -> StorageResult<()>,
{
    if let Err(first) = op() {
        tracing::warn!("Store operation failed, retrying once: {}", first);
        op()?;
    }
    Ok(())
}
