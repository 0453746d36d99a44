//! Per-origin robots.txt cache
//!
//! One parsed policy per (scheme, host, port), fetched on first need and
//! memoized for the lifetime of the owning controller. Concurrent checks for
//! the same origin coalesce on a per-key once-cell, so each origin is fetched
//! at most once.

use crate::robots::{fetch_robots, RobotsPolicy};
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

/// Cache key: one robots.txt per origin
type OriginKey = (String, String, Option<u16>);

/// Memoized robots.txt policies for the origins a task touches
pub struct RobotsCache {
    client: Client,
    user_agent: String,
    entries: Mutex<HashMap<OriginKey, Arc<OnceCell<RobotsPolicy>>>>,
}

impl RobotsCache {
    pub fn new(client: Client, user_agent: String) -> Self {
        Self {
            client,
            user_agent,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Checks whether the task may fetch this URL
    ///
    /// Returns true for URLs without a host (nothing to key on) and whenever
    /// the origin's robots.txt could not be fetched.
    pub async fn can_fetch(&self, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(host) => host.to_string(),
            None => return true,
        };

        let key = (url.scheme().to_string(), host, url.port());
        let cell = {
            let mut entries = self.entries.lock();
            entries.entry(key.clone()).or_default().clone()
        };

        let policy = cell
            .get_or_init(|| fetch_robots(&self.client, &key.0, &key.1, key.2))
            .await;

        policy.is_allowed(url.as_str(), &self.user_agent)
    }

    /// Number of origins with a cached policy
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
