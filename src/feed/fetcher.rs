//! HTTP feed retrieval.
//!
//! Produces a [`FetchOutcome`] for one feed URL: sends the previous
//! validators as conditional headers, walks redirects by hand so a
//! permanent move is distinguishable from a temporary one, bounds the
//! request with a timeout and the body with a size cap, and folds
//! transport results into the closed status set the channel consumes.
//! Nothing here returns `Err` to the caller — a failed fetch IS an
//! outcome.

use futures::StreamExt;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LOCATION};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::{parser, FetchOutcome, FetchStatus};

/// User-Agent sent with every feed request.
pub const USER_AGENT: &str = concat!("orrery/", env!("CARGO_PKG_VERSION"));

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

#[derive(Debug, Error)]
enum BodyError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("response too large")]
    TooLarge,
    #[error("incomplete response: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: usize },
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Response body cap.
    pub max_size: usize,
    /// Redirect hops before giving up.
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_size: MAX_FEED_SIZE,
            max_redirects: 5,
        }
    }
}

/// HTTP client configured for feed fetching. Redirects are disabled so
/// [`fetch_feed`] can observe each hop's status.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(USER_AGENT)
        .build()
        .expect("reqwest client construction cannot fail with static options")
}

/// Fetch and classify one feed.
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    etag: Option<&str>,
    last_modified: Option<&str>,
    config: &FetchConfig,
) -> FetchOutcome {
    let mut current = url.to_string();
    let mut permanent = false;
    let mut hops = 0usize;

    loop {
        let mut request = client.get(&current);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = match tokio::time::timeout(config.timeout, request.send()).await {
            Err(_) => {
                return FetchOutcome::bare(FetchStatus::Timeout, None);
            }
            Ok(Err(e)) if e.is_timeout() => {
                return FetchOutcome::bare(FetchStatus::Timeout, None);
            }
            Ok(Err(e)) => {
                tracing::warn!(feed = %url, error = %e, "transport error");
                return FetchOutcome::bare(FetchStatus::Error { status: 0 }, None);
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();

        if status.is_redirection() && status != StatusCode::NOT_MODIFIED {
            if hops >= config.max_redirects {
                tracing::warn!(feed = %url, "redirect limit exceeded");
                return FetchOutcome::bare(
                    FetchStatus::Error {
                        status: status.as_u16(),
                    },
                    Some(status.as_u16()),
                );
            }
            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                return FetchOutcome::bare(
                    FetchStatus::Error {
                        status: status.as_u16(),
                    },
                    Some(status.as_u16()),
                );
            };
            if matches!(
                status,
                StatusCode::MOVED_PERMANENTLY | StatusCode::PERMANENT_REDIRECT
            ) {
                permanent = true;
            }
            current = resolve_location(&current, location);
            hops += 1;
            continue;
        }

        match status.as_u16() {
            304 => return FetchOutcome::bare(FetchStatus::Unchanged, Some(304)),
            410 => return FetchOutcome::bare(FetchStatus::Gone, Some(410)),
            408 => return FetchOutcome::bare(FetchStatus::Timeout, Some(408)),
            s if s >= 400 => {
                return FetchOutcome::bare(FetchStatus::Error { status: s }, Some(s));
            }
            _ => {}
        }

        let retain_all = status.as_u16() == 226;
        let etag_out = header_string(&response, ETAG);
        let last_modified_out = header_string(&response, LAST_MODIFIED);

        let bytes = match read_limited_bytes(response, config.max_size).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(feed = %url, error = %e, "failed to read feed body");
                return FetchOutcome::bare(FetchStatus::Error { status: 500 }, Some(status.as_u16()));
            }
        };

        let feed = match parser::parse_document(&bytes) {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(feed = %url, error = %e, "feed document did not parse");
                return FetchOutcome::bare(FetchStatus::Error { status: 500 }, Some(status.as_u16()));
            }
        };

        let (status, http_status) = if retain_all {
            (FetchStatus::RetainAll, 226)
        } else if permanent && current != url && !feed.entries.is_empty() {
            (FetchStatus::Moved { url: current }, 301)
        } else {
            (FetchStatus::Fresh, status.as_u16())
        };

        return FetchOutcome {
            status,
            http_status: Some(http_status),
            etag: etag_out,
            last_modified: last_modified_out,
            feed,
        };
    }
}

fn resolve_location(base: &str, location: &str) -> String {
    Url::parse(base)
        .ok()
        .and_then(|b| b.join(location).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| location.to_string())
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, BodyError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(BodyError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BodyError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // A short read means the transfer was cut off mid-body; the next
    // cycle retries it.
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(BodyError::Incomplete {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test</title>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn quick_config() -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(5),
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn fresh_fetch_captures_validators_and_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("ETag", "\"abc\"")
                    .insert_header("Last-Modified", "Mon, 15 Mar 2021 12:30:45 GMT"),
            )
            .mount(&server)
            .await;

        let outcome = fetch_feed(
            &client(),
            &format!("{}/feed", server.uri()),
            None,
            None,
            &quick_config(),
        )
        .await;

        assert_eq!(outcome.status, FetchStatus::Fresh);
        assert_eq!(outcome.http_status, Some(200));
        assert_eq!(outcome.etag.as_deref(), Some("\"abc\""));
        assert_eq!(outcome.feed.entries.len(), 1);
    }

    #[tokio::test]
    async fn conditional_headers_are_sent_and_304_maps_to_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"abc\""))
            .and(header("If-Modified-Since", "Mon, 15 Mar 2021 12:30:45 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetch_feed(
            &client(),
            &format!("{}/feed", server.uri()),
            Some("\"abc\""),
            Some("Mon, 15 Mar 2021 12:30:45 GMT"),
            &quick_config(),
        )
        .await;

        assert_eq!(outcome.status, FetchStatus::Unchanged);
        assert_eq!(outcome.http_status, Some(304));
    }

    #[tokio::test]
    async fn gone_and_errors_classify_without_entries() {
        let server = MockServer::start().await;
        Mock::given(path("/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gone = fetch_feed(
            &client(),
            &format!("{}/gone", server.uri()),
            None,
            None,
            &quick_config(),
        )
        .await;
        assert_eq!(gone.status, FetchStatus::Gone);

        let missing = fetch_feed(
            &client(),
            &format!("{}/missing", server.uri()),
            None,
            None,
            &quick_config(),
        )
        .await;
        assert_eq!(missing.status, FetchStatus::Error { status: 404 });
        assert!(missing.feed.entries.is_empty());
    }

    #[tokio::test]
    async fn permanent_redirect_with_entries_is_moved() {
        let server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", "/new"),
            )
            .mount(&server)
            .await;
        Mock::given(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&server)
            .await;

        let outcome = fetch_feed(
            &client(),
            &format!("{}/old", server.uri()),
            None,
            None,
            &quick_config(),
        )
        .await;

        assert_eq!(
            outcome.status,
            FetchStatus::Moved {
                url: format!("{}/new", server.uri())
            }
        );
        assert_eq!(outcome.http_status, Some(301));
        assert_eq!(outcome.feed.entries.len(), 1);
    }

    #[tokio::test]
    async fn temporary_redirect_stays_fresh() {
        let server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", "/new"),
            )
            .mount(&server)
            .await;
        Mock::given(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&server)
            .await;

        let outcome = fetch_feed(
            &client(),
            &format!("{}/old", server.uri()),
            None,
            None,
            &quick_config(),
        )
        .await;
        assert_eq!(outcome.status, FetchStatus::Fresh);
    }

    #[tokio::test]
    async fn unparseable_body_maps_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&server)
            .await;

        let outcome = fetch_feed(
            &client(),
            &format!("{}/feed", server.uri()),
            None,
            None,
            &quick_config(),
        )
        .await;
        assert_eq!(outcome.status, FetchStatus::Error { status: 500 });
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let config = FetchConfig {
            timeout: Duration::from_millis(100),
            ..FetchConfig::default()
        };
        let outcome = fetch_feed(
            &client(),
            &format!("{}/feed", server.uri()),
            None,
            None,
            &config,
        )
        .await;
        assert_eq!(outcome.status, FetchStatus::Timeout);
    }
}
