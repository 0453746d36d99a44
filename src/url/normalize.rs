use crate::{UrlError, UrlResult};
use url::Url;

/// Normalizes an absolute URL into the canonical form used for dedup keying
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Lowercase scheme and host, strip default ports (80/443)
/// 3. Remove the fragment
/// 4. Collapse `.` / `..` path segments; an empty path becomes `/` and
///    trailing slashes are preserved
/// 5. Normalize percent-encoding: uppercase hex digits, decode unreserved
///    characters
/// 6. Stable-sort query pairs by key (repeated keys keep their relative order)
///
/// The result is idempotent: normalizing a normalized URL is a no-op.
///
/// # Arguments
///
/// * `url_str` - The absolute URL string to normalize
///
/// # Examples
///
/// ```
/// use crawld::url::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM:80/a/../b?z=1&a=2#frag").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/b?a=2&z=1");
/// ```
pub fn normalize_url(url_str: &str) -> UrlResult<Url> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    // The parser already lowercases scheme and host, strips default ports,
    // and removes dot segments. The remaining work is ours.
    url.set_fragment(None);

    let normalized_path = normalize_percent(url.path());
    url.set_path(&normalized_path);

    if let Some(query) = url.query() {
        if query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&normalize_query(query)));
        }
    }

    Ok(url)
}

/// Sorts query pairs by key with a stable sort, normalizing each pair's
/// percent-encoding. Pairs without `=` sort by their whole text.
fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .map(|pair| {
            let normalized = normalize_percent(pair);
            let key = normalized.split('=').next().unwrap_or("").to_string();
            (key, normalized)
        })
        .collect();

    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    pairs
        .into_iter()
        .map(|(_, pair)| pair)
        .collect::<Vec<_>>()
        .join("&")
}

/// Rewrites percent-encodings: hex digits uppercased, unreserved characters
/// (ALPHA / DIGIT / `-` `.` `_` `~`) decoded. Malformed sequences pass
/// through untouched.
fn normalize_percent(component: &str) -> String {
    let chars: Vec<char> = component.chars().collect();
    let mut out = String::with_capacity(component.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '%' && i + 2 < chars.len() {
            if let (Some(hi), Some(lo)) = (chars[i + 1].to_digit(16), chars[i + 2].to_digit(16)) {
                let value = (hi * 16 + lo) as u8;
                if is_unreserved(value) {
                    out.push(value as char);
                } else {
                    out.push('%');
                    out.push(chars[i + 1].to_ascii_uppercase());
                    out.push(chars[i + 2].to_ascii_uppercase());
                }
                i += 3;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}
