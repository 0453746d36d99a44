//! The crawl execution engine
//!
//! This module contains the engine core: the HTTP fetcher, the HTML
//! extractor, the worker loop, the per-task controller, and the
//! process-wide registry the API layer drives.

mod controller;
mod extract;
mod fetcher;
mod registry;
mod worker;

pub use controller::TaskController;
pub use extract::{extract, PageMetadata};
pub use fetcher::{build_http_client, download, fetch_url, Download, FetchOutcome, FetchedPage, RetryPolicy, USER_AGENT};
pub use registry::Engine;
