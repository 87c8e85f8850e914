//! Page fetch seam.
//!
//! Resolution code talks to the site through [`PageSource`] so tests can
//! serve fixed pages from memory. [`SitePageSource`] is the production
//! implementation: every request waits for the shared [`RateLimiter`] and
//! transient failures are retried with the transport [`RetryPolicy`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::download::{
    DownloadError, FailureType, FetchedBytes, HttpClient, ProbeInfo, RateLimiter, RetryDecision,
    RetryPolicy, classify_error, parse_retry_after,
};

/// Read access to the catalog: pages, JSON endpoints, images and probes.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// GET `url` as text.
    async fn get_text(&self, url: &str) -> Result<String, DownloadError>;

    /// GET `url` as JSON.
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, DownloadError>;

    /// GET `url` as raw bytes.
    async fn get_bytes(&self, url: &str) -> Result<FetchedBytes, DownloadError>;

    /// HEAD `url`.
    async fn probe(&self, url: &str) -> Result<ProbeInfo, DownloadError>;
}

/// Rate-limited, retrying [`PageSource`] over [`HttpClient`].
#[derive(Debug, Clone)]
pub struct SitePageSource {
    client: HttpClient,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl SitePageSource {
    /// Wraps `client`; every request goes through `limiter`.
    #[must_use]
    pub fn new(client: HttpClient, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            client,
            limiter,
            policy,
        }
    }

    async fn with_retry<T, F, Fut>(&self, url: &str, op: F) -> Result<T, DownloadError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DownloadError>> + Send,
        T: Send,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.acquire().await;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let failure_type = classify_error(&error);
            let retry_after = if failure_type == FailureType::RateLimited {
                record_retry_after(&self.limiter, &error).await
            } else {
                None
            };

            match self.policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    let delay = retry_after.unwrap_or(delay);
                    debug!(
                        url = %url,
                        attempt = next_attempt,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %url, %reason, attempt, "giving up on request");
                    return Err(error);
                }
            }
        }
    }
}

/// Pushes the limiter's next slot past a server-mandated Retry-After.
///
/// Returns the extra wait the caller still owes (zero once recorded), or
/// `None` when `error` carries no usable header.
pub(crate) async fn record_retry_after(
    limiter: &RateLimiter,
    error: &DownloadError,
) -> Option<Duration> {
    let delay = parse_retry_after(error.retry_after()?)?;
    limiter.record_rate_limit(delay).await;
    // The limiter already holds the next slot.
    Some(Duration::ZERO)
}

#[async_trait]
impl PageSource for SitePageSource {
    #[instrument(skip(self), fields(url = %url))]
    async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        self.with_retry(url, || self.client.get_text(url)).await
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, DownloadError> {
        self.with_retry(url, || self.client.get_json(url)).await
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn get_bytes(&self, url: &str) -> Result<FetchedBytes, DownloadError> {
        self.with_retry(url, || self.client.get_bytes(url)).await
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn probe(&self, url: &str) -> Result<ProbeInfo, DownloadError> {
        self.with_retry(url, || self.client.probe(url)).await
    }
}
