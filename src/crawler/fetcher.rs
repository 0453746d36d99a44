//! HTTP fetching with retry logic
//!
//! Builds the per-task HTTP client and performs bounded GET requests with
//! exponential-backoff retries for transient failures (network errors and
//! 5xx responses). Redirects follow reqwest's capped policy; 4xx responses
//! fail immediately.

use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::{Duration, Instant};
use url::Url;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("crawld/", env!("CARGO_PKG_VERSION"));

/// Hard per-request timeout so a hung fetch cannot block shutdown
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Redirect hop cap
const MAX_REDIRECTS: usize = 10;

/// HTML bodies larger than this are truncated; size still accumulates up to
/// the cap (10 MiB)
const MAX_HTML_BODY: usize = 10 * 1024 * 1024;

/// Base delay for exponential backoff between retries
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// A successfully fetched response
#[derive(Debug)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: Url,
    pub status_code: u16,
    /// Content-Type with parameters stripped, e.g. "text/html"
    pub content_type: String,
    /// Body text for HTML responses; None for other content types, whose
    /// size comes from the Content-Length header
    pub body: Option<String>,
    pub file_size: u64,
    /// Wall-clock seconds for the successful attempt
    pub elapsed: f64,
}

/// Outcome of a fetch after retries are exhausted
#[derive(Debug)]
pub enum FetchOutcome {
    Success(FetchedPage),
    Failure {
        status_code: Option<u16>,
        error: String,
    },
}

/// Retry policy for transient fetch failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: BACKOFF_BASE,
        }
    }

    /// Exponential backoff: delay = base_delay * 2^attempt
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// 5xx responses and network-level errors are transient; 4xx is permanent
    fn is_retryable(status: Option<StatusCode>, is_network_error: bool) -> bool {
        if is_network_error {
            return true;
        }

        match status {
            Some(status) => status.is_server_error(),
            None => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Builds the HTTP client shared by a task's workers
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a URL, retrying transient failures per the policy
///
/// Returns the terminal outcome: either a fetched page or the final error
/// with the last observed status code.
pub async fn fetch_url(client: &Client, url: &Url, policy: &RetryPolicy) -> FetchOutcome {
    let mut attempt = 0;

    loop {
        let result = fetch_once(client, url).await;

        let (retryable, status) = match &result {
            FetchOutcome::Success(_) => (false, None),
            FetchOutcome::Failure { status_code, .. } => {
                let status = status_code.and_then(|code| StatusCode::from_u16(code).ok());
                (
                    RetryPolicy::is_retryable(status, status_code.is_none()),
                    *status_code,
                )
            }
        };

        if !retryable || attempt >= policy.max_retries {
            return result;
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::debug!(
            "Retry {}/{} for {} (status {:?}), waiting {:?}",
            attempt + 1,
            policy.max_retries,
            url,
            status,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// One fetch attempt
async fn fetch_once(client: &Client, url: &Url) -> FetchOutcome {
    let started = Instant::now();

    let response = match client.get(url.clone()).send().await {
        Ok(response) => response,
        Err(e) => {
            return FetchOutcome::Failure {
                status_code: e.status().map(|status| status.as_u16()),
                error: classify_error(&e),
            };
        }
    };

    // 2xx and terminal 3xx count as success; 4xx/5xx fail (5xx retryably)
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return FetchOutcome::Failure {
            status_code: Some(status.as_u16()),
            error: format!("HTTP status {}", status),
        };
    }

    let final_url = response.url().clone();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();

    if content_type.contains("text/html") || content_type.is_empty() {
        // Stream the body with a size cap
        let mut body = Vec::new();
        let mut response = response;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    body.extend_from_slice(&chunk);
                    if body.len() >= MAX_HTML_BODY {
                        body.truncate(MAX_HTML_BODY);
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    return FetchOutcome::Failure {
                        status_code: Some(status.as_u16()),
                        error: format!("Failed to read body: {}", e),
                    };
                }
            }
        }

        let file_size = body.len() as u64;
        FetchOutcome::Success(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body: Some(String::from_utf8_lossy(&body).into_owned()),
            file_size,
            elapsed: started.elapsed().as_secs_f64(),
        })
    } else {
        // Non-HTML: only the size is retained, from the declared length
        let file_size = response.content_length().unwrap_or(0);
        FetchOutcome::Success(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body: None,
            file_size,
            elapsed: started.elapsed().as_secs_f64(),
        })
    }
}

fn classify_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "Request timeout".to_string()
    } else if e.is_connect() {
        format!("Connection error: {}", e)
    } else if e.is_redirect() {
        format!("Redirect error: {}", e)
    } else {
        e.to_string()
    }
}

/// A proxy-fetched resource for the download endpoint
#[derive(Debug)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

/// Fetches a URL on behalf of a client, bypassing the engine
///
/// Bodies are never cached by the engine; the download endpoint re-fetches
/// on demand through the same client configuration the workers use.
pub async fn download(client: &Client, url: &Url) -> Result<Download, reqwest::Error> {
    let response = client.get(url.clone()).send().await?.error_for_status()?;

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let filename = filename_for(url);
    let bytes = response.bytes().await?.to_vec();

    Ok(Download {
        bytes,
        content_type,
        filename,
    })
}

/// Derives a safe attachment filename from the URL path
fn filename_for(url: &Url) -> String {
    let raw = url
        .path_segments()
        .and_then(|segments| segments.last().map(|s| s.to_string()))
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| "download".to_string());

    let mut name = percent_decode(&raw)
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect::<String>();

    if !name.contains('.') {
        name.push_str(".html");
    }

    // Keep filenames within a sane length, preserving the extension
    const MAX_NAME: usize = 200;
    if name.len() > MAX_NAME {
        let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_string());
        let mut end = MAX_NAME - extension.as_ref().map(|e| e.len() + 1).unwrap_or(0);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
        if let Some(extension) = extension {
            name.push('.');
            name.push_str(&extension);
        }
    }

    name
}

/// Decodes %XX sequences; malformed sequences pass through
fn percent_decode(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut bytes = Vec::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '%' && i + 2 < chars.len() {
            if let (Some(hi), Some(lo)) = (chars[i + 1].to_digit(16), chars[i + 2].to_digit(16)) {
                bytes.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        let mut buffer = [0u8; 4];
        bytes.extend_from_slice(chars[i].encode_utf8(&mut buffer).as_bytes());
        i += 1;
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client().is_ok());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.delay_for_attempt(0), BACKOFF_BASE);
        assert_eq!(policy.delay_for_attempt(1), BACKOFF_BASE * 2);
        assert_eq!(policy.delay_for_attempt(2), BACKOFF_BASE * 4);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RetryPolicy::is_retryable(
            Some(StatusCode::SERVICE_UNAVAILABLE),
            false
        ));
        assert!(RetryPolicy::is_retryable(
            Some(StatusCode::INTERNAL_SERVER_ERROR),
            false
        ));
        assert!(!RetryPolicy::is_retryable(Some(StatusCode::NOT_FOUND), false));
        assert!(!RetryPolicy::is_retryable(Some(StatusCode::FORBIDDEN), false));
        assert!(RetryPolicy::is_retryable(None, true));
    }

    #[tokio::test]
    async fn test_fetch_html_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><title>Hi</title></html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let client = build_http_client().unwrap();
        let outcome = fetch_url(
            &client,
            &url(&format!("{}/page", server.uri())),
            &RetryPolicy::new(0),
        )
        .await;

        match outcome {
            FetchOutcome::Success(page) => {
                assert_eq!(page.status_code, 200);
                assert_eq!(page.content_type, "text/html");
                assert!(page.body.unwrap().contains("Hi"));
                assert!(page.file_size > 0);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_non_html_skips_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 64])
                    .insert_header("content-type", "image/png"),
            )
            .mount(&server)
            .await;

        let client = build_http_client().unwrap();
        let outcome = fetch_url(
            &client,
            &url(&format!("{}/img.png", server.uri())),
            &RetryPolicy::new(0),
        )
        .await;

        match outcome {
            FetchOutcome::Success(page) => {
                assert_eq!(page.content_type, "image/png");
                assert!(page.body.is_none());
                assert_eq!(page.file_size, 64);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_404_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = build_http_client().unwrap();
        let outcome = fetch_url(
            &client,
            &url(&format!("{}/gone", server.uri())),
            &RetryPolicy::new(3),
        )
        .await;

        match outcome {
            FetchOutcome::Failure { status_code, .. } => assert_eq!(status_code, Some(404)),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_503_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3) // initial attempt + 2 retries
            .mount(&server)
            .await;

        let client = build_http_client().unwrap();
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
        };
        let outcome = fetch_url(&client, &url(&format!("{}/flaky", server.uri())), &policy).await;

        match outcome {
            FetchOutcome::Failure { status_code, .. } => assert_eq!(status_code, Some(503)),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_503_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recovering"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recovering"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html>ok</html>")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let client = build_http_client().unwrap();
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
        };
        let outcome = fetch_url(
            &client,
            &url(&format!("{}/recovering", server.uri())),
            &policy,
        )
        .await;

        assert!(matches!(outcome, FetchOutcome::Success(_)));
    }

    #[tokio::test]
    async fn test_redirect_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", "/new"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html>moved</html>")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let client = build_http_client().unwrap();
        let outcome = fetch_url(
            &client,
            &url(&format!("{}/old", server.uri())),
            &RetryPolicy::new(0),
        )
        .await;

        match outcome {
            FetchOutcome::Success(page) => {
                assert!(page.final_url.path().ends_with("/new"));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_download_filename() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/report.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8, 2, 3])
                    .insert_header("content-type", "application/pdf"),
            )
            .mount(&server)
            .await;

        let client = build_http_client().unwrap();
        let result = download(&client, &url(&format!("{}/files/report.pdf", server.uri())))
            .await
            .unwrap();

        assert_eq!(result.filename, "report.pdf");
        assert_eq!(result.content_type, "application/pdf");
        assert_eq!(result.bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_filename_defaults() {
        assert_eq!(filename_for(&url("https://a.test/")), "download.html");
        assert_eq!(filename_for(&url("https://a.test/page")), "page.html");
        assert_eq!(filename_for(&url("https://a.test/a%20b.txt")), "a b.txt");
    }

    #[test]
    fn test_filename_illegal_chars_replaced() {
        let name = filename_for(&url("https://a.test/we%3Cird%3E.txt"));
        assert_eq!(name, "we_ird_.txt");
    }
}
