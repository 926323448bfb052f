//! Ranged byte fetchers.
//!
//! [`RangeFetcher`] is the seam between the download worker and the
//! network. [`HttpFetcher`] talks HTTP with retries; [`StaticFetcher`] serves
//! bytes held in memory.

use super::DownloadError;
use crate::config::DownloadConfig;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{header, Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tapedeck_media::{ByteSpan, SegmentIndex};

/// Source of remote media bytes.
#[async_trait::async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Fetch `span` of the resource at `url`.
    async fn fetch_range(&self, url: &str, span: ByteSpan) -> Result<Bytes, DownloadError>;

    /// Fetch the whole resource.
    async fn fetch_all(&self, url: &str) -> Result<Bytes, DownloadError>;
}

/// Fetch and parse a segment index.
pub async fn load_index(
    fetcher: &dyn RangeFetcher,
    url: &str,
) -> Result<SegmentIndex, DownloadError> {
    let json = fetcher.fetch_all(url).await?;
    let index = SegmentIndex::from_slice(&json)?;
    tracing::debug!(
        "Loaded segment index {}: {} segments, {} frames, version {}",
        url,
        index.len(),
        index.frame_count(),
        index.format_version()
    );
    Ok(index)
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, DownloadError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, DownloadError>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < self.max_retries => {
                    let delay = self.delay(retry);
                    tracing::warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        what,
                        e,
                        retry + 1,
                        self.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DownloadConfig::default())
    }
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// HTTP fetcher issuing `Range` requests.
pub struct HttpFetcher {
    client: Client,
    bearer_token: Option<String>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            client,
            bearer_token: config.bearer_token.clone(),
            retry: RetryPolicy::from_config(config),
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_range_once(&self, url: &str, span: ByteSpan) -> Result<Bytes, DownloadError> {
        let response = self
            .request(url)
            .header(header::RANGE, span.range_header())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        let expected = span.len();
        let sliced = if status == StatusCode::PARTIAL_CONTENT {
            body
        } else {
            // Server ignored the Range header and sent the whole resource.
            let end = span.end.min(body.len() as u64) as usize;
            let start = (span.start as usize).min(end);
            body.slice(start..end)
        };

        if (sliced.len() as u64) < expected {
            return Err(DownloadError::ShortRead {
                expected,
                got: sliced.len() as u64,
            });
        }
        Ok(sliced.slice(..expected as usize))
    }

    async fn get_all_once(&self, url: &str) -> Result<Bytes, DownloadError> {
        let response = self.request(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait::async_trait]
impl RangeFetcher for HttpFetcher {
    async fn fetch_range(&self, url: &str, span: ByteSpan) -> Result<Bytes, DownloadError> {
        if span.is_empty() {
            return Ok(Bytes::new());
        }
        let what = format!("GET {} {}", url, span.range_header());
        self.retry
            .run(&what, || self.get_range_once(url, span))
            .await
    }

    async fn fetch_all(&self, url: &str) -> Result<Bytes, DownloadError> {
        let what = format!("GET {}", url);
        self.retry.run(&what, || self.get_all_once(url)).await
    }
}

// ---------------------------------------------------------------------------
// StaticFetcher
// ---------------------------------------------------------------------------

/// In-memory fetcher keyed by URL.
#[derive(Default, Clone)]
pub struct StaticFetcher {
    resources: Arc<RwLock<HashMap<String, Bytes>>>,
    requests: Arc<AtomicUsize>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, data: impl Into<Bytes>) {
        self.resources.write().insert(url.into(), data.into());
    }

    /// Number of fetches served so far, successful or not.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    fn lookup(&self, url: &str) -> Result<Bytes, DownloadError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.resources
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| DownloadError::Http {
                status: 404,
                url: url.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl RangeFetcher for StaticFetcher {
    async fn fetch_range(&self, url: &str, span: ByteSpan) -> Result<Bytes, DownloadError> {
        let data = self.lookup(url)?;
        if span.end > data.len() as u64 {
            return Err(DownloadError::ShortRead {
                expected: span.len(),
                got: (data.len() as u64).saturating_sub(span.start),
            });
        }
        Ok(data.slice(span.start as usize..span.end as usize))
    }

    async fn fetch_all(&self, url: &str) -> Result<Bytes, DownloadError> {
        self.lookup(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tapedeck_media::fmp4::SyntheticVideo;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(5), Duration::from_millis(3200));
        assert_eq!(policy.delay(6), Duration::from_secs(5));
        assert_eq!(policy.delay(40), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_permanent_error() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(DownloadError::Http {
                    status: 404,
                    url: "x".into(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_error() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result = policy
            .run("test", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DownloadError::Transport("reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(DownloadError::Timeout("slow".into()))
            })
            .await;
        assert!(matches!(result, Err(DownloadError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_static_fetcher_ranges() {
        let fetcher = StaticFetcher::new();
        fetcher.insert("mem://a", Bytes::from_static(b"0123456789"));

        let got = fetcher
            .fetch_range("mem://a", ByteSpan::new(2, 5))
            .await
            .unwrap();
        assert_eq!(&got[..], b"234");

        let err = fetcher
            .fetch_range("mem://a", ByteSpan::new(8, 20))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ShortRead { .. }));

        let err = fetcher.fetch_all("mem://missing").await.unwrap_err();
        assert!(matches!(err, DownloadError::Http { status: 404, .. }));
        assert_eq!(fetcher.request_count(), 3);
    }

    #[tokio::test]
    async fn test_load_index() {
        let media = SyntheticVideo::new(30.0, 60).build().unwrap();
        let fetcher = StaticFetcher::new();
        fetcher.insert("mem://index", media.index_json.clone());
        fetcher.insert("mem://bad", "{\"segments\": []}");

        let index = load_index(&fetcher, "mem://index").await.unwrap();
        assert_eq!(index.frame_count(), 60);

        let err = load_index(&fetcher, "mem://bad").await.unwrap_err();
        assert!(err.is_malformed_index());
    }
}
