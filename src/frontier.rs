//! Crawl frontier: the pending-work queue plus the seen-set
//!
//! The frontier decides which URLs a task will fetch and in what order. A
//! URL enters at most once: the seen-set check and the insertion happen in
//! the same critical section, so when two workers discover the same URL
//! concurrently exactly one `offer` returns `Accepted`.
//!
//! Three orderings are supported, selected at controller construction:
//! FIFO (breadth), LIFO (depth), and a three-rank bucketed priority queue
//! keyed on a content-type guess from the URL extension.

use crate::config::CrawlStrategy;
use crate::url::same_site;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;

/// Outcome of offering a URL to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// URL entered the seen-set and the queue
    Accepted,
    /// URL was already seen; discarded
    Duplicate,
    /// URL is deeper than the task's `max_depth`; discarded
    DepthBlocked,
    /// URL's host differs from the seed's and cross-domain is off; discarded
    CrossDomainBlocked,
    /// Frontier growth is paused; discarded without marking seen
    FrontierPaused,
}

/// An entry waiting to be fetched
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    pub url: Url,
    pub depth: u32,
}

/// Priority-queue entry: lower (rank, seq) pops first
#[derive(Debug)]
struct RankedEntry {
    rank: u8,
    seq: u64,
    url: Url,
    depth: u32,
}

impl Ord for RankedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap pops the lowest rank, FIFO within rank
        (other.rank, other.seq).cmp(&(self.rank, self.seq))
    }
}

impl PartialOrd for RankedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RankedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for RankedEntry {}

/// The ordered container behind the frontier
enum Queue {
    Fifo(VecDeque<FrontierEntry>),
    Lifo(Vec<FrontierEntry>),
    Ranked(BinaryHeap<RankedEntry>),
}

impl Queue {
    fn for_strategy(strategy: CrawlStrategy) -> Self {
        match strategy {
            CrawlStrategy::Breadth => Self::Fifo(VecDeque::new()),
            CrawlStrategy::Depth => Self::Lifo(Vec::new()),
            CrawlStrategy::Priority => Self::Ranked(BinaryHeap::new()),
        }
    }

    fn push(&mut self, url: Url, depth: u32, seq: u64) {
        match self {
            Self::Fifo(queue) => queue.push_back(FrontierEntry { url, depth }),
            Self::Lifo(stack) => stack.push(FrontierEntry { url, depth }),
            Self::Ranked(heap) => {
                let rank = priority_rank(&url);
                heap.push(RankedEntry {
                    rank,
                    seq,
                    url,
                    depth,
                });
            }
        }
    }

    fn pop(&mut self) -> Option<FrontierEntry> {
        match self {
            Self::Fifo(queue) => queue.pop_front(),
            Self::Lifo(stack) => stack.pop(),
            Self::Ranked(heap) => heap.pop().map(|entry| FrontierEntry {
                url: entry.url,
                depth: entry.depth,
            }),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Fifo(queue) => queue.len(),
            Self::Lifo(stack) => stack.len(),
            Self::Ranked(heap) => heap.len(),
        }
    }
}

struct Inner {
    queue: Queue,
    seen: HashSet<String>,
    paused: bool,
    closed: bool,
    seq: u64,
}

/// The frontier for one task
pub struct Frontier {
    inner: Mutex<Inner>,
    notify: Notify,
    strategy: CrawlStrategy,
    max_depth: u32,
    allow_cross_domain: bool,
    seed_host: String,
}

impl Frontier {
    pub fn new(
        strategy: CrawlStrategy,
        max_depth: u32,
        allow_cross_domain: bool,
        seed_host: String,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: Queue::for_strategy(strategy),
                seen: HashSet::new(),
                paused: false,
                closed: false,
                seq: 0,
            }),
            notify: Notify::new(),
            strategy,
            max_depth,
            allow_cross_domain,
            seed_host,
        }
    }

    /// Offers a discovered URL to the frontier
    ///
    /// The URL must already be normalized; it is keyed by its string form.
    /// Checks run in order: frontier pause, seen-set, depth, cross-domain.
    /// The seen-set check and insertion share one critical section.
    pub fn offer(&self, url: &Url, depth: u32) -> Offer {
        let mut inner = self.inner.lock();

        if inner.paused {
            return Offer::FrontierPaused;
        }

        if inner.seen.contains(url.as_str()) {
            return Offer::Duplicate;
        }

        if depth > self.max_depth {
            return Offer::DepthBlocked;
        }

        if !self.allow_cross_domain {
            let host_matches = url
                .host_str()
                .map(|host| same_site(host, &self.seed_host))
                .unwrap_or(false);
            if !host_matches {
                return Offer::CrossDomainBlocked;
            }
        }

        inner.seen.insert(url.as_str().to_string());
        let seq = inner.seq;
        inner.seq += 1;
        inner.queue.push(url.clone(), depth, seq);
        drop(inner);

        self.notify.notify_one();
        Offer::Accepted
    }

    /// Enqueues the seed URL at depth 0, bypassing the seen-set
    ///
    /// On a restart the seen-set is rehydrated from terminal records before
    /// seeding, so the seed is re-fetched but its links drain as duplicates.
    pub fn seed(&self, url: Url) {
        let mut inner = self.inner.lock();
        inner.seen.insert(url.as_str().to_string());
        let seq = inner.seq;
        inner.seq += 1;
        inner.queue.push(url, 0, seq);
        drop(inner);
        self.notify.notify_one();
    }

    /// Bulk-marks URLs as seen (rehydration from terminal records)
    pub fn mark_seen<I>(&self, urls: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut inner = self.inner.lock();
        inner.seen.extend(urls);
    }

    /// Removes and returns the next entry per the strategy
    ///
    /// Blocks up to `timeout`, waking early when an offer lands or the
    /// frontier closes. Returns `None` on timeout or shutdown.
    pub async fn poll(&self, timeout: Duration) -> Option<FrontierEntry> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }
                if let Some(entry) = inner.queue.pop() {
                    return Some(entry);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Stops frontier growth; queued entries keep draining
    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    /// Restores frontier growth
    pub fn resume(&self) {
        self.inner.lock().paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Wakes all pollers and makes subsequent polls return immediately
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Resets the frontier for a fresh start: queue, seen-set, and the
    /// closed flag are all cleared; the pause toggle is restored to active
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.queue = Queue::for_strategy(self.strategy);
        inner.seen.clear();
        inner.paused = false;
        inner.closed = false;
        inner.seq = 0;
    }
}

/// Content-type guess from the URL extension: HTML-like documents first,
/// then images, then everything else
fn priority_rank(url: &Url) -> u8 {
    let path = url.path();
    let last_segment = path.rsplit('/').next().unwrap_or("");
    let extension = match last_segment.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return 0, // no extension reads as a page
    };

    match extension.as_str() {
        "html" | "htm" | "php" | "jsp" | "asp" => 0,
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" | "ico" | "bmp" => 1,
        _ => 2,
    }
}
