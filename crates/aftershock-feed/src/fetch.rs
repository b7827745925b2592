//! Document and archive fetching.
//!
//! Enum dispatch over two backends, since async methods are not
//! dyn-compatible: an HTTP backend for the live feed and a static backend
//! that serves pre-registered bodies by URL for offline replay and tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::error::FeedError;

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of retries after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry in milliseconds.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

// ---------------------------------------------------------------------------
// Unified fetcher enum
// ---------------------------------------------------------------------------

/// Source of feed documents, detail documents and archives.
#[derive(Debug, Clone)]
pub enum Fetcher {
    /// Live HTTP requests with retry.
    Http(HttpFetcher),
    /// Pre-registered responses.
    Static(StaticFetcher),
}

impl Fetcher {
    /// Fetch the raw body at `url`.
    ///
    /// # Errors
    ///
    /// Returns a network-class [`FeedError`] when the body cannot be
    /// obtained.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        match self {
            Self::Http(fetcher) => fetcher.fetch_bytes(url).await,
            Self::Static(fetcher) => fetcher.fetch_bytes(url).await,
        }
    }

    /// Fetch `url` and decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Parse`] if the body is not the expected JSON,
    /// or the fetch error.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FeedError> {
        let bytes = self.fetch_bytes(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| FeedError::parse(url, e.to_string()))
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Http(_) => "http",
            Self::Static(_) => "static",
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// Timeout and retry settings for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries after the first attempt for retryable failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubled after each retry.
    pub initial_backoff: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
        }
    }
}

/// Fetcher backed by `reqwest`.
///
/// Connection errors, timeouts and 5xx answers are retried with
/// exponential backoff; every other failure is returned immediately.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    initial_backoff: Duration,
}

impl HttpFetcher {
    /// Build a fetcher from its settings.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Network`] if the HTTP client cannot be built
    /// (for example when no TLS backend is available).
    pub fn new(config: &HttpConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("aftershock/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Network {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        let mut attempt: u32 = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(
                        url,
                        attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(url, &e))?;
        Ok(body.to_vec())
    }
}

fn transport_error(url: &str, error: &reqwest::Error) -> FeedError {
    if error.is_timeout() {
        FeedError::Timeout {
            url: url.to_owned(),
        }
    } else {
        FeedError::Network {
            url: url.to_owned(),
            message: error.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Static backend
// ---------------------------------------------------------------------------

/// Fetcher serving registered bodies by exact URL.
///
/// Clones share the same registry, so a test can keep one handle and
/// change responses between polls. Unregistered URLs answer like a 404.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    responses: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    requests: Arc<RwLock<Vec<String>>>,
}

impl StaticFetcher {
    /// Create an empty fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the body served for `url`.
    pub async fn insert(&self, url: impl Into<String>, body: Vec<u8>) {
        self.responses.write().await.insert(url.into(), body);
    }

    /// Register a JSON document for `url`.
    pub async fn insert_json(&self, url: impl Into<String>, document: &serde_json::Value) {
        self.insert(url, document.to_string().into_bytes()).await;
    }

    /// Remove the body served for `url`.
    pub async fn remove(&self, url: &str) {
        self.responses.write().await.remove(url);
    }

    /// Every URL requested so far, in request order.
    pub async fn requests(&self) -> Vec<String> {
        self.requests.read().await.clone()
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        self.requests.write().await.push(url.to_owned());
        self.responses
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| FeedError::Status {
                url: url.to_owned(),
                status: 404,
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_fetcher_serves_registered_bodies() {
        let fetcher = StaticFetcher::new();
        fetcher
            .insert_json("https://feed.test/doc", &serde_json::json!({"answer": 42}))
            .await;
        let handle = Fetcher::Static(fetcher.clone());

        let doc: serde_json::Value = handle.fetch_json("https://feed.test/doc").await.unwrap();
        assert_eq!(doc.get("answer"), Some(&serde_json::json!(42)));

        let missing = handle.fetch_bytes("https://feed.test/other").await.unwrap_err();
        assert!(matches!(missing, FeedError::Status { status: 404, .. }));

        assert_eq!(
            fetcher.requests().await,
            vec!["https://feed.test/doc", "https://feed.test/other"]
        );
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_failure() {
        let fetcher = StaticFetcher::new();
        fetcher.insert("https://feed.test/bad", b"{not json".to_vec()).await;

        let err = Fetcher::Static(fetcher)
            .fetch_json::<serde_json::Value>("https://feed.test/bad")
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Parse { .. }));
    }
}
