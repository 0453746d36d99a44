//! URL handling: normalization, host extraction, and same-site checks

mod normalize;

pub use normalize::normalize_url;

use url::Url;

/// Extracts the host from an absolute URL string
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Strips a leading `www.` so `www.example.com` and `example.com` compare equal
pub fn registrable_host(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Checks whether two hosts belong to the same site for the cross-domain policy
pub fn same_site(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
        || registrable_host(&a.to_lowercase()) == registrable_host(&b.to_lowercase())
}
