//! End-to-end engine tests against mock HTTP fixtures
//!
//! Each test drives a full task through the engine registry: seed, worker
//! pool, frontier, robots, and the record store, asserting on both the live
//! snapshot counters and the persisted records.

use crawld::config::{CrawlStrategy, TaskSpec};
use crawld::state::{TaskLifecycle, UrlStatus};
use crawld::storage::{RecordStore, SqliteStore};
use crawld::Engine;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_engine() -> (Arc<Engine>, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let engine = Engine::new(store.clone()).unwrap();
    (engine, store)
}

fn spec(seed: &str) -> TaskSpec {
    TaskSpec {
        name: "test-task".to_string(),
        seed_url: seed.to_string(),
        strategy: CrawlStrategy::Breadth,
        max_depth: 3,
        worker_count: 2,
        request_interval: 0.0,
        retry_times: 0,
        respect_robots: false,
        allow_cross_domain: false,
    }
}

async fn html_page(server: &MockServer, page_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(page_path.to_string()))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

/// Waits until the task reaches a terminal lifecycle (15 s cap)
async fn wait_for_terminal(engine: &Arc<Engine>, task_id: i64) -> TaskLifecycle {
    for _ in 0..150 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = engine.monitor(task_id).unwrap();
        if snapshot.lifecycle.is_terminal() {
            return snapshot.lifecycle;
        }
    }
    panic!("task {} did not reach a terminal lifecycle in time", task_id);
}

// Scenario: single-page seed with a self-link, an internal link, and a
// cross-domain link
#[tokio::test]
async fn test_single_page_seed_with_cross_domain_and_self_link() {
    let server = MockServer::start().await;
    let base = server.uri();

    html_page(
        &server,
        "/a",
        format!(
            r#"<html><body>
                <a href="{base}/a">self</a>
                <a href="{base}/b">b</a>
                <a href="http://external.invalid/x">ext</a>
            </body></html>"#
        ),
    )
    .await;
    html_page(&server, "/b", "<html><body>leaf</body></html>".to_string()).await;

    let (engine, store) = test_engine();
    let mut task_spec = spec(&format!("{}/a", base));
    task_spec.max_depth = 1;
    let id = engine.create_task(&task_spec).unwrap();
    engine.start_task(id).unwrap();

    // Hold the controller so its counters stay readable after completion
    let controller = engine.get_controller(id).unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    let records = store.export_records(id).unwrap();
    let urls: HashSet<&str> = records.iter().map(|record| record.url.as_str()).collect();
    assert_eq!(records.len(), 2);
    assert!(urls.iter().all(|url| !url.contains("external.invalid")));
    assert!(records
        .iter()
        .all(|record| record.status == UrlStatus::Completed));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.completed_urls, 2);
    assert_eq!(snapshot.failed_urls, 0);
    assert_eq!(snapshot.cross_domain_blocked_urls, 1);
    assert_eq!(snapshot.duplicate_urls, 1); // the self-link
    assert_eq!(snapshot.total_urls, 2);
}

// Scenario: depth cap cuts the chain at max_depth
#[tokio::test]
async fn test_depth_cap() {
    let server = MockServer::start().await;
    let base = server.uri();

    for i in 0..3 {
        html_page(
            &server,
            &format!("/{}", i),
            format!(r#"<html><body><a href="{}/{}">next</a></body></html>"#, base, i + 1),
        )
        .await;
    }
    html_page(&server, "/3", "<html><body>too deep</body></html>".to_string()).await;

    let (engine, store) = test_engine();
    let mut task_spec = spec(&format!("{}/0", base));
    task_spec.max_depth = 2;
    let id = engine.create_task(&task_spec).unwrap();
    engine.start_task(id).unwrap();
    let controller = engine.get_controller(id).unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    let records = store.export_records(id).unwrap();
    let urls: HashSet<&str> = records.iter().map(|record| record.url.as_str()).collect();
    assert_eq!(records.len(), 3);
    assert!(!urls.iter().any(|url| url.ends_with("/3")));
    assert!(records.iter().all(|record| record.depth <= 2));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.depth_blocked_urls, 1);
    assert_eq!(snapshot.completed_urls, 3);
}

// Scenario: robots.txt blocks /private; the blocked URL is recorded but
// counts toward neither completed nor failed
#[tokio::test]
async fn test_robots_blocked_url_recorded() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
        )
        .mount(&server)
        .await;
    html_page(
        &server,
        "/a",
        format!(
            r#"<html><body>
                <a href="{base}/public">public</a>
                <a href="{base}/private">private</a>
            </body></html>"#
        ),
    )
    .await;
    html_page(&server, "/public", "<html><body>open</body></html>".to_string()).await;

    let (engine, store) = test_engine();
    let mut task_spec = spec(&format!("{}/a", base));
    task_spec.respect_robots = true;
    let id = engine.create_task(&task_spec).unwrap();
    engine.start_task(id).unwrap();
    let controller = engine.get_controller(id).unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    let records = store.export_records(id).unwrap();
    let private = records
        .iter()
        .find(|record| record.url.ends_with("/private"))
        .expect("blocked URL must still be recorded");
    assert_eq!(private.status, UrlStatus::RobotsBlocked);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.completed_urls, 2); // seed + /public
    assert_eq!(snapshot.failed_urls, 0);
    assert_eq!(snapshot.robots_blocked_urls, 1);
}

// Scenario: transient 503s retry up to retry_times, then fail once
#[tokio::test]
async fn test_retry_then_fail() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3) // initial attempt + retry_times retries, no more
        .mount(&server)
        .await;

    let (engine, store) = test_engine();
    let mut task_spec = spec(&format!("{}/flaky", server.uri()));
    task_spec.retry_times = 2;
    let id = engine.create_task(&task_spec).unwrap();
    engine.start_task(id).unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    let records = store.export_records(id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, UrlStatus::Failed);
    assert_eq!(records[0].status_code, Some(503));
}

// Scenario: pausing the frontier drops link discoveries while in-flight
// work drains; a restart re-activates the queue
#[tokio::test]
async fn test_pause_frontier_stops_growth() {
    let server = MockServer::start().await;
    let base = server.uri();

    // Slow seed so the pause lands while it is in flight
    Mock::given(method("GET"))
        .and(path("/seed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    format!(
                        r#"<html><body>
                        <a href="{base}/p1">1</a>
                        <a href="{base}/p2">2</a>
                        <a href="{base}/p3">3</a>
                    </body></html>"#
                    ),
                    "text/html",
                )
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;
    for page in ["/p1", "/p2", "/p3"] {
        html_page(&server, page, "<html><body>leaf</body></html>".to_string()).await;
    }

    let (engine, store) = test_engine();
    let id = engine.create_task(&spec(&format!("{}/seed", base))).unwrap();
    engine.start_task(id).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.pause_queue(id).unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    // Discoveries made while paused were dropped
    let records = store.export_records(id).unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].url.ends_with("/seed"));

    // Restart re-activates the queue and growth resumes
    engine.start_task(id).unwrap();
    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    let records = store.export_records(id).unwrap();
    assert_eq!(records.len(), 4);
}

// Scenario: restart after completion preserves records, re-fetches the
// seed, and drains through the rehydrated seen-set
#[tokio::test]
async fn test_restart_after_completion() {
    let server = MockServer::start().await;
    let base = server.uri();

    html_page(
        &server,
        "/a",
        format!(r#"<html><body><a href="{base}/b">b</a></body></html>"#),
    )
    .await;
    html_page(&server, "/b", "<html><body>leaf</body></html>".to_string()).await;

    let (engine, store) = test_engine();
    let id = engine.create_task(&spec(&format!("{}/a", base))).unwrap();

    engine.start_task(id).unwrap();
    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    let first_records = store.export_records(id).unwrap();
    assert_eq!(first_records.len(), 2);
    let first_seed_completed_at = first_records
        .iter()
        .find(|record| record.url.ends_with("/a"))
        .unwrap()
        .completed_at
        .clone();

    tokio::time::sleep(Duration::from_millis(20)).await;

    engine.start_task(id).unwrap();
    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    let second_records = store.export_records(id).unwrap();
    assert_eq!(second_records.len(), 2, "records from the first run are preserved");

    let seed = second_records
        .iter()
        .find(|record| record.url.ends_with("/a"))
        .unwrap();
    assert_ne!(
        seed.completed_at, first_seed_completed_at,
        "the seed is re-fetched on restart"
    );

    // /b was rehydrated into the seen-set, not re-enqueued
    let b_record = second_records
        .iter()
        .find(|record| record.url.ends_with("/b"))
        .unwrap();
    assert_eq!(b_record.status, UrlStatus::Completed);
}

// Invariant: completed + failed + robots_blocked <= total discovered, and
// at most one record per (task, url)
#[tokio::test]
async fn test_counter_and_uniqueness_invariants() {
    let server = MockServer::start().await;
    let base = server.uri();

    html_page(
        &server,
        "/",
        format!(
            r#"<html><body>
                <a href="{base}/x">x</a>
                <a href="{base}/x">x again</a>
                <a href="{base}/missing">missing</a>
            </body></html>"#
        ),
    )
    .await;
    html_page(&server, "/x", "<html><body>x</body></html>".to_string()).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (engine, store) = test_engine();
    let id = engine.create_task(&spec(&format!("{}/", base))).unwrap();
    engine.start_task(id).unwrap();
    let controller = engine.get_controller(id).unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    let snapshot = controller.snapshot();
    assert!(
        snapshot.completed_urls + snapshot.failed_urls + snapshot.robots_blocked_urls
            <= snapshot.total_urls
    );
    assert_eq!(snapshot.completed_urls, 2);
    assert_eq!(snapshot.failed_urls, 1); // the 404

    let records = store.export_records(id).unwrap();
    let distinct: HashSet<&str> = records.iter().map(|record| record.url.as_str()).collect();
    assert_eq!(records.len(), distinct.len());
}

// Round-trip: the same fixture produces the same record set on a second,
// independent task
#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let server = MockServer::start().await;
    let base = server.uri();

    html_page(
        &server,
        "/",
        format!(
            r#"<html><body><a href="{base}/one">1</a><a href="{base}/two">2</a></body></html>"#
        ),
    )
    .await;
    html_page(&server, "/one", "<html><body>1</body></html>".to_string()).await;
    html_page(&server, "/two", "<html><body>2</body></html>".to_string()).await;

    let (engine, store) = test_engine();

    let mut url_sets = Vec::new();
    for _ in 0..2 {
        let id = engine.create_task(&spec(&format!("{}/", base))).unwrap();
        engine.start_task(id).unwrap();
        assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

        let mut urls: Vec<String> = store
            .export_records(id)
            .unwrap()
            .into_iter()
            .map(|record| record.url)
            .collect();
        urls.sort();
        url_sets.push(urls);
    }

    assert_eq!(url_sets[0], url_sets[1]);
}

// Per-worker spacing: consecutive fetches by the same worker stay at least
// request_interval apart
#[tokio::test]
async fn test_request_interval_spacing() {
    let server = MockServer::start().await;
    let base = server.uri();

    html_page(
        &server,
        "/",
        format!(r#"<html><body><a href="{base}/next">next</a></body></html>"#),
    )
    .await;
    html_page(&server, "/next", "<html><body>n</body></html>".to_string()).await;

    let (engine, store) = test_engine();
    let mut task_spec = spec(&format!("{}/", base));
    task_spec.worker_count = 1;
    task_spec.request_interval = 0.4;
    let id = engine.create_task(&task_spec).unwrap();
    engine.start_task(id).unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    let records = store.export_records(id).unwrap();
    let mut completed: Vec<chrono::DateTime<chrono::Utc>> = records
        .iter()
        .filter_map(|record| record.completed_at.as_deref())
        .map(|stamp| {
            chrono::DateTime::parse_from_rfc3339(stamp)
                .unwrap()
                .with_timezone(&chrono::Utc)
        })
        .collect();
    completed.sort();

    assert_eq!(completed.len(), 2);
    let gap = completed[1] - completed[0];
    // Allow jitter tolerance below the configured 400 ms
    assert!(
        gap >= chrono::Duration::milliseconds(350),
        "fetches were only {:?} apart",
        gap
    );
}

// Metadata lands on the completed record
#[tokio::test]
async fn test_metadata_extraction_end_to_end() {
    let server = MockServer::start().await;

    html_page(
        &server,
        "/article",
        r#"<html><head>
            <title>The Article</title>
            <meta name="author" content="A. Writer">
            <meta name="description" content="About things">
            <meta name="keywords" content="a, b">
            <meta property="article:published_time" content="2024-03-01T00:00:00Z">
        </head><body>text</body></html>"#
            .to_string(),
    )
    .await;

    let (engine, store) = test_engine();
    let id = engine
        .create_task(&spec(&format!("{}/article", server.uri())))
        .unwrap();
    engine.start_task(id).unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    let records = store.export_records(id).unwrap();
    let record = &records[0];
    assert_eq!(record.title.as_deref(), Some("The Article"));
    assert_eq!(record.author.as_deref(), Some("A. Writer"));
    assert_eq!(record.description.as_deref(), Some("About things"));
    assert_eq!(record.keywords.as_deref(), Some("a, b"));
    assert_eq!(record.publish_time.as_deref(), Some("2024-03-01T00:00:00Z"));
    assert_eq!(record.status_code, Some(200));
    assert!(record.file_size.unwrap_or(0) > 0);
    assert!(record.response_time.unwrap_or(0.0) > 0.0);
}

// Pause settles workers after their current URL; resume continues the crawl
#[tokio::test]
async fn test_pause_and_resume_workers() {
    let server = MockServer::start().await;
    let base = server.uri();

    html_page(
        &server,
        "/",
        format!(
            r#"<html><body>
                <a href="{base}/s1">1</a>
                <a href="{base}/s2">2</a>
                <a href="{base}/s3">3</a>
            </body></html>"#
        ),
    )
    .await;
    for page in ["/s1", "/s2", "/s3"] {
        Mock::given(method("GET"))
            .and(path(page.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>slow leaf</body></html>", "text/html")
                    .set_delay(Duration::from_millis(150)),
            )
            .mount(&server)
            .await;
    }

    let (engine, _store) = test_engine();
    let mut task_spec = spec(&format!("{}/", base));
    task_spec.worker_count = 1;
    let id = engine.create_task(&task_spec).unwrap();
    engine.start_task(id).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.pause_task(id).unwrap();

    // Workers settle; nothing is processed while paused
    tokio::time::sleep(Duration::from_millis(500)).await;
    let paused = engine.monitor(id).unwrap();
    assert_eq!(paused.lifecycle, TaskLifecycle::Paused);
    let processed_while_paused = paused.completed_urls;

    tokio::time::sleep(Duration::from_millis(400)).await;
    let still_paused = engine.monitor(id).unwrap();
    assert_eq!(still_paused.completed_urls, processed_while_paused);

    engine.resume_task(id).unwrap();
    assert_eq!(wait_for_terminal(&engine, id).await, TaskLifecycle::Completed);

    let done = engine.monitor(id).unwrap();
    assert_eq!(done.completed_urls + done.failed_urls, 4);
}
