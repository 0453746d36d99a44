//! Robots.txt fetching, parsing, and caching
//!
//! When a task's configuration sets `respect_robots = false` none of this is
//! consulted; otherwise each origin's policy is fetched once and memoized.

mod cache;
mod parser;

pub use cache::RobotsCache;
pub use parser::RobotsPolicy;

use reqwest::Client;
use std::time::Duration;

/// Timeout for robots.txt fetches, kept short so an unresponsive origin
/// cannot stall the first fetch against it
const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches and parses robots.txt for an origin
///
/// Any failure (network error, non-success status, unreadable body) results
/// in an allow-all policy, logged at debug level; a missing robots.txt must
/// not stop a crawl.
pub async fn fetch_robots(
    client: &Client,
    scheme: &str,
    host: &str,
    port: Option<u16>,
) -> RobotsPolicy {
    let robots_url = match port {
        Some(port) => format!("{}://{}:{}/robots.txt", scheme, host, port),
        None => format!("{}://{}/robots.txt", scheme, host),
    };

    tracing::debug!("Fetching robots.txt from {}", robots_url);

    match client
        .get(&robots_url)
        .timeout(ROBOTS_FETCH_TIMEOUT)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => match response.text().await {
            Ok(content) => RobotsPolicy::from_content(&content),
            Err(e) => {
                tracing::warn!("Failed to read robots.txt body from {}: {}", robots_url, e);
                RobotsPolicy::allow_all()
            }
        },
        Ok(response) => {
            tracing::debug!(
                "robots.txt at {} returned {}, allowing all",
                robots_url,
                response.status()
            );
            RobotsPolicy::allow_all()
        }
        Err(e) => {
            tracing::warn!("Failed to fetch robots.txt from {}: {}", robots_url, e);
            RobotsPolicy::allow_all()
        }
    }
}
