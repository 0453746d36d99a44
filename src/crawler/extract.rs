//! HTML metadata and link extraction
//!
//! Parses a fetched HTML body into document metadata (title, author,
//! description, keywords, publish time) plus the outbound links to offer to
//! the frontier. Parsing is synchronous: scraper's DOM is not `Send`, so the
//! document never lives across an await point.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Soft limit on stored text fields, applied at a char boundary
const FIELD_LIMIT: usize = 1024;

/// Metadata and outbound links extracted from one document
#[derive(Debug, Clone, Default)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub publish_time: Option<String>,
    /// Absolute outbound link targets, in document order, de-duplicated
    pub links: Vec<String>,
}

impl PageMetadata {
    /// Empty metadata for non-HTML responses
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Extracts metadata and links from an HTML body
///
/// Relative links resolve against the document's base URL, honoring a
/// `<base href>` element when present. `javascript:`, `mailto:`, `tel:` and
/// `data:` targets are discarded, as are fragment-only anchors.
pub fn extract(html: &str, fetched_url: &Url) -> PageMetadata {
    let document = Html::parse_document(html);
    let base_url = document_base(&document, fetched_url);

    PageMetadata {
        title: select_text(&document, "title")
            .or_else(|| meta_content(&document, "meta[property=\"og:title\"]")),
        author: meta_content(&document, "meta[name=\"author\"]")
            .or_else(|| meta_content(&document, "meta[property=\"article:author\"]"))
            .or_else(|| select_text(&document, "a[rel=\"author\"]")),
        description: meta_content(&document, "meta[name=\"description\"]")
            .or_else(|| meta_content(&document, "meta[property=\"og:description\"]")),
        keywords: meta_content(&document, "meta[name=\"keywords\"]"),
        publish_time: meta_content(&document, "meta[property=\"article:published_time\"]")
            .or_else(|| time_datetime(&document))
            .or_else(|| meta_content(&document, "meta[itemprop=\"datePublished\"]")),
        links: extract_links(&document, &base_url),
    }
}

/// Resolves the document base: `<base href>` joined against the fetched URL,
/// falling back to the fetched URL itself
fn document_base(document: &Html, fetched_url: &Url) -> Url {
    let Ok(selector) = Selector::parse("base[href]") else {
        return fetched_url.clone();
    };

    document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| fetched_url.join(href).ok())
        .unwrap_or_else(|| fetched_url.clone())
}

/// First matching element's text content, trimmed and clipped
fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .map(|text| clip(&text))
}

/// First matching element's `content` attribute, trimmed and clipped
fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr("content"))
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .map(|content| clip(&content))
}

/// `<time datetime=...>`, falling back to the element text
fn time_datetime(document: &Html) -> Option<String> {
    let selector = Selector::parse("time").ok()?;
    let element = document.select(&selector).next()?;

    let value = match element.value().attr("datetime") {
        Some(datetime) => datetime.to_string(),
        None => element.text().collect::<String>(),
    };

    let value = value.trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(clip(&value))
    }
}

/// Collects `a[href]` and `img[src]` targets, resolved and filtered
fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();
    let mut seen = HashSet::new();

    let mut push = |href: &str| {
        if let Some(absolute) = resolve_link(href, base_url) {
            if seen.insert(absolute.clone()) {
                links.push(absolute);
            }
        }
    };

    if let Ok(selector) = Selector::parse("a[href]") {
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    if let Ok(selector) = Selector::parse("img[src]") {
        for element in document.select(&selector) {
            if let Some(src) = element.value().attr("src") {
                push(src);
            }
        }
    }

    links
}

/// Resolves a link target to an absolute HTTP(S) URL
///
/// Returns None for inline schemes, fragment-only anchors, and anything that
/// fails to resolve.
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    if absolute.scheme() == "http" || absolute.scheme() == "https" {
        Some(absolute.to_string())
    } else {
        None
    }
}

/// Truncates to the soft field limit at a char boundary
fn clip(text: &str) -> String {
    if text.len() <= FIELD_LIMIT {
        return text.to_string();
    }

    let mut end = FIELD_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
