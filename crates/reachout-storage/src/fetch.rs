//! Job-board page fetching under a global concurrency cap and per-source
//! request budgets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};

use crate::rate::{TokenBucket, TokenBucketConfig};

/// Longest `Retry-After` a board can make us honour.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: usize) -> Duration {
        let factor = 1u32.checked_shl(retry as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Throttling and server-side failures are worth another attempt.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Seconds form of `Retry-After`; HTTP-date values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
    /// Budget for sources with no explicit rate.
    pub default_rate: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_in_flight: 8,
            retry: RetryPolicy::default(),
            default_rate: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("building http client: {0}")]
    Client(String),
}

/// Shared by every job-board adapter. Each attempt, retries included, spends
/// one token from its source's bucket.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Semaphore,
    buckets: Mutex<HashMap<String, Arc<TokenBucket>>>,
    default_rate: Option<TokenBucketConfig>,
    retry: RetryPolicy,
}

enum Attempt {
    Done(FetchedPage),
    Retry {
        error: FetchError,
        wait: Option<Duration>,
    },
    Fail(FetchError),
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            in_flight: Semaphore::new(config.max_in_flight.max(1)),
            buckets: Mutex::new(HashMap::new()),
            default_rate: config.default_rate,
            retry: config.retry,
        })
    }

    /// Installs (or replaces) the budget for `source_id`.
    pub async fn set_source_rate(&self, source_id: &str, rate: TokenBucketConfig) {
        self.buckets
            .lock()
            .await
            .insert(source_id.to_string(), Arc::new(TokenBucket::new(rate)));
    }

    async fn bucket_for(&self, source_id: &str) -> Option<Arc<TokenBucket>> {
        let mut buckets = self.buckets.lock().await;
        if let Some(bucket) = buckets.get(source_id) {
            return Some(bucket.clone());
        }
        let bucket = Arc::new(TokenBucket::new(self.default_rate?));
        buckets.insert(source_id.to_string(), bucket.clone());
        Some(bucket)
    }

    /// GETs `url` as text, waiting for the source's budget before every
    /// attempt.
    pub async fn fetch_page(&self, source_id: &str, url: &str) -> Result<FetchedPage, FetchError> {
        let bucket = self.bucket_for(source_id).await;
        let span = info_span!("http_fetch", source_id, url);
        async {
            let mut retry = 0;
            loop {
                if let Some(bucket) = &bucket {
                    bucket.take().await;
                }
                let attempt = {
                    let _permit = self
                        .in_flight
                        .acquire()
                        .await
                        .expect("fetch semaphore is never closed");
                    self.attempt(url).await
                };
                match attempt {
                    Attempt::Done(page) => return Ok(page),
                    Attempt::Fail(error) => return Err(error),
                    Attempt::Retry { error, .. } if retry >= self.retry.retries => {
                        warn!(%error, attempts = retry + 1, "giving up");
                        return Err(error);
                    }
                    Attempt::Retry { error, wait } => {
                        let delay = wait.unwrap_or_default().max(self.retry.delay(retry));
                        debug!(%error, retry, delay_ms = delay.as_millis() as u64, "retrying");
                        tokio::time::sleep(delay).await;
                        retry += 1;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, url: &str) -> Attempt {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) if is_transient_error(&err) => {
                return Attempt::Retry {
                    error: err.into(),
                    wait: None,
                }
            }
            Err(err) => return Attempt::Fail(err.into()),
        };

        let status = resp.status();
        let final_url = resp.url().to_string();
        if status.is_success() {
            return match resp.text().await {
                Ok(body) => Attempt::Done(FetchedPage {
                    status,
                    url: final_url,
                    body,
                }),
                Err(err) => Attempt::Fail(err.into()),
            };
        }

        let error = FetchError::HttpStatus {
            status: status.as_u16(),
            url: final_url,
        };
        if is_transient_status(status) {
            Attempt::Retry {
                error,
                wait: retry_after(resp.headers()),
            }
        } else {
            Attempt::Fail(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_delay_is_exponential_and_capped() {
        let policy = RetryPolicy {
            retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(350));
        assert_eq!(policy.delay(40), Duration::from_millis(350));
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn retry_after_reads_seconds_and_caps_them() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3600"));
        assert_eq!(retry_after(&headers), Some(MAX_RETRY_AFTER));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test]
    async fn budgets_are_tracked_per_source() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            default_rate: Some(TokenBucketConfig::per_minute(10)),
            ..Default::default()
        })
        .unwrap();
        fetcher
            .set_source_rate("linkedin", TokenBucketConfig::per_minute(5))
            .await;

        let linkedin = fetcher.bucket_for("linkedin").await.unwrap();
        let github = fetcher.bucket_for("github-careers").await.unwrap();
        assert_eq!(linkedin.capacity(), 5);
        assert_eq!(github.capacity(), 10);
        assert!(Arc::ptr_eq(&github, &fetcher.bucket_for("github-careers").await.unwrap()));
    }

    #[tokio::test]
    async fn sources_without_a_budget_are_unthrottled() {
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        assert!(fetcher.bucket_for("indeed").await.is_none());
    }
}
