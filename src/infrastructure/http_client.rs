//! Page fetcher with browser-like headers and differentiated retry backoff
//!
//! One `fetch` call makes up to `retry_attempts` GETs. Every attempt is
//! classified as success, blocked (403), rate limited (429) or transient
//! (anything else), and each failure class waits differently before the next
//! attempt. Running out of attempts is a normal result, not an error.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONNECTION, DNT, HeaderMap, HeaderName, HeaderValue,
    REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::infrastructure::config::ScrapingConfig;
use crate::infrastructure::parsing_error::{ScrapeError, ScrapeResult};

/// Referer sent for each known retailer domain
const REFERER_TABLE: &[(&str, &str)] = &[
    ("amazon.co.uk", "https://www.amazon.co.uk/"),
    ("jjfoodservice.com", "https://www.jjfoodservice.com/"),
    ("atoz-catering.co.uk", "https://www.atoz-catering.co.uk/"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Body,
    Other,
}

/// A GET that never produced an HTTP status
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else if e.is_body() || e.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Empty unless the status is 200
    pub body: String,
}

/// One HTTP GET, no retries
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn get(&self, url: &str, headers: HeaderMap) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport with a cookie jar and transparent decompression
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<TransportResponse, TransportError> {
        let response = self.client.get(url).headers(headers).send().await?;
        let status = response.status().as_u16();
        let body = if status == 200 {
            response.text().await?
        } else {
            String::new()
        };
        Ok(TransportResponse { status, body })
    }
}

/// Waits between attempts, in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub blocked_wait: Range<f64>,
    pub rate_limited_wait: Range<f64>,
    /// Backoff base, drawn once per `fetch` call
    pub backoff_base: Range<f64>,
    pub jitter: Range<f64>,
    /// Upper bound on any single transient backoff
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            blocked_wait: 5.0..10.0,
            rate_limited_wait: 10.0..20.0,
            backoff_base: 1.0..3.0,
            jitter: 0.0..1.0,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// No waiting at all
    pub const fn immediate() -> Self {
        Self {
            blocked_wait: 0.0..0.0,
            rate_limited_wait: 0.0..0.0,
            backoff_base: 0.0..0.0,
            jitter: 0.0..0.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Wait after a transient failure on the zero-based `attempt_index`:
    /// `base * 2^attempt_index + jitter`, capped at `max_backoff`
    pub fn transient_wait(&self, base: f64, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let secs = base * 2f64.powi(exponent) + sample(&self.jitter);
        Duration::try_from_secs_f64(secs)
            .map_or(self.max_backoff, |wait| wait.min(self.max_backoff))
    }
}

fn sample(range: &Range<f64>) -> f64 {
    if range.end <= range.start {
        return range.start;
    }
    range.start + fastrand::f64() * (range.end - range.start)
}

fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Why an attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    Blocked,
    RateLimited,
    Transient(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success(String),
    Blocked,
    RateLimited,
    TransientError(String),
    /// Every attempt failed; `last` is the final attempt's failure
    Exhausted { attempts: u32, last: FailureClass },
    Cancelled,
}

impl FetchResult {
    /// Classify one attempt's outcome
    pub fn classify(outcome: Result<TransportResponse, TransportError>) -> Self {
        match outcome {
            Ok(TransportResponse { status: 200, body }) => Self::Success(body),
            Ok(TransportResponse { status: 403, .. }) => Self::Blocked,
            Ok(TransportResponse { status: 429, .. }) => Self::RateLimited,
            Ok(TransportResponse { status, .. }) => Self::TransientError(format!("HTTP {status}")),
            Err(e) => Self::TransientError(e.to_string()),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Body on success, otherwise the matching `ScrapeError`
    pub fn into_body(self, url: &str) -> ScrapeResult<String> {
        let failure = |class: FailureClass, attempts: u32| match class {
            FailureClass::Blocked => ScrapeError::BlockedByOrigin {
                url: url.to_string(),
                attempts,
            },
            FailureClass::RateLimited => ScrapeError::RateLimited {
                url: url.to_string(),
                attempts,
            },
            FailureClass::Transient(cause) => ScrapeError::NetworkFailure {
                url: url.to_string(),
                attempts,
                cause,
            },
        };

        match self {
            Self::Success(body) => Ok(body),
            Self::Cancelled => Err(ScrapeError::Cancelled),
            Self::Exhausted { attempts, last } => Err(failure(last, attempts)),
            Self::Blocked => Err(failure(FailureClass::Blocked, 1)),
            Self::RateLimited => Err(failure(FailureClass::RateLimited, 1)),
            Self::TransientError(cause) => Err(failure(FailureClass::Transient(cause), 1)),
        }
    }
}

/// Retrying page fetcher shared by every scrape task
#[derive(Debug, Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    user_agents: Vec<String>,
    retry_attempts: u32,
    policy: RetryPolicy,
}

impl Fetcher {
    /// Fetcher backed by reqwest, configured from `scraping`
    pub fn new(scraping: &ScrapingConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(scraping.request_timeout())?;
        Ok(Self::with_transport(Arc::new(transport), scraping))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, scraping: &ScrapingConfig) -> Self {
        Self {
            transport,
            user_agents: scraping.user_agents.clone(),
            retry_attempts: scraping.retry_attempts.max(1),
            policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// GET `url` with retries until success, exhaustion or cancellation
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> FetchResult {
        let base = sample(&self.policy.backoff_base);
        let mut last = FailureClass::Transient("no attempt made".to_string());

        for attempt in 1..=self.retry_attempts {
            if cancel.is_cancelled() {
                debug!("Fetch of {} cancelled before attempt {}", url, attempt);
                return FetchResult::Cancelled;
            }

            debug!("Fetching {} (attempt {}/{})", url, attempt, self.retry_attempts);
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Fetch of {} cancelled during attempt {}", url, attempt);
                    return FetchResult::Cancelled;
                }
                outcome = self.transport.get(url, self.build_headers(url)) => {
                    FetchResult::classify(outcome)
                }
            };

            let wait = match outcome {
                FetchResult::Success(body) => {
                    debug!("Fetched {} on attempt {} ({} bytes)", url, attempt, body.len());
                    return FetchResult::Success(body);
                }
                FetchResult::Blocked => {
                    warn!(
                        "Blocked (HTTP 403) fetching {} on attempt {}/{}",
                        url, attempt, self.retry_attempts
                    );
                    last = FailureClass::Blocked;
                    seconds(sample(&self.policy.blocked_wait))
                }
                FetchResult::RateLimited => {
                    warn!(
                        "Rate limited (HTTP 429) fetching {} on attempt {}/{}",
                        url, attempt, self.retry_attempts
                    );
                    last = FailureClass::RateLimited;
                    seconds(sample(&self.policy.rate_limited_wait))
                }
                FetchResult::TransientError(cause) => {
                    warn!(
                        "Transient failure fetching {} on attempt {}/{}: {}",
                        url, attempt, self.retry_attempts, cause
                    );
                    last = FailureClass::Transient(cause);
                    self.policy.transient_wait(base, attempt - 1)
                }
                terminal @ (FetchResult::Exhausted { .. } | FetchResult::Cancelled) => {
                    return terminal;
                }
            };

            if attempt < self.retry_attempts {
                debug!("Waiting {:?} before retrying {}", wait, url);
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return FetchResult::Cancelled,
                    () = tokio::time::sleep(wait) => {}
                }
            }
        }

        error!(
            "Giving up on {} after {} attempts (last failure: {:?})",
            url, self.retry_attempts, last
        );
        FetchResult::Exhausted {
            attempts: self.retry_attempts,
            last,
        }
    }

    /// Single GET without retries, returning the HTTP status
    pub async fn probe(&self, url: &str) -> Result<u16, TransportError> {
        self.transport
            .get(url, self.build_headers(url))
            .await
            .map(|response| response.status)
    }

    /// Browser-like header set for one request
    pub fn build_headers(&self, url: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let agent = fastrand::choice(&self.user_agents)
            .cloned()
            .unwrap_or_else(generated_user_agent);
        match HeaderValue::from_str(&agent) {
            Ok(value) => {
                headers.insert(USER_AGENT, value);
            }
            Err(e) => {
                warn!("Ignoring invalid user agent '{}': {}", agent, e);
                if let Ok(value) = HeaderValue::from_str(&generated_user_agent()) {
                    headers.insert(USER_AGENT, value);
                }
            }
        }

        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB,en;q=0.9"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
        headers.insert(DNT, HeaderValue::from_static("1"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        for (name, value) in [
            ("sec-fetch-dest", "document"),
            ("sec-fetch-mode", "navigate"),
            ("sec-fetch-user", "?1"),
        ] {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }

        let fetch_site = match referer_for(url) {
            Some(referer) => {
                headers.insert(REFERER, HeaderValue::from_static(referer));
                "same-origin"
            }
            None => "none",
        };
        headers.insert(
            HeaderName::from_static("sec-fetch-site"),
            HeaderValue::from_static(fetch_site),
        );

        headers
    }
}

/// Referer for the retailer that serves `url`, if known
pub fn referer_for(url: &str) -> Option<&'static str> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    REFERER_TABLE
        .iter()
        .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{domain}")))
        .map(|(_, referer)| *referer)
}

/// A current desktop Chrome user agent with a randomized major version
pub fn generated_user_agent() -> String {
    let major = fastrand::u32(120..=126);
    format!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{major}.0.0.0 Safari/537.36"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedTransport;

    const URL: &str = "https://www.jjfoodservice.com/product/BAC002";

    fn fetcher(transport: Arc<ScriptedTransport>, attempts: u32) -> Fetcher {
        let scraping = ScrapingConfig {
            retry_attempts: attempts,
            ..ScrapingConfig::default()
        };
        Fetcher::with_transport(transport, &scraping)
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_retry_limit_on_server_errors() {
        let transport = Arc::new(ScriptedTransport::new().with_status(URL, 500));
        let fetcher = fetcher(transport.clone(), 3);

        let result = fetcher.fetch(URL, &CancellationToken::new()).await;

        assert_eq!(transport.calls_to(URL), 3);
        assert_eq!(
            result,
            FetchResult::Exhausted {
                attempts: 3,
                last: FailureClass::Transient("HTTP 500".to_string()),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried_as_transient_failures() {
        let transport = Arc::new(
            ScriptedTransport::new().with_response(URL, ScriptedTransport::timeout()),
        );
        let fetcher = fetcher(transport.clone(), 3);

        let result = fetcher.fetch(URL, &CancellationToken::new()).await;

        assert_eq!(transport.calls_to(URL), 3);
        assert!(matches!(
            &result,
            FetchResult::Exhausted {
                attempts: 3,
                last: FailureClass::Transient(_)
            }
        ));
        let err = result.into_body(URL).unwrap_err();
        assert!(matches!(err, ScrapeError::NetworkFailure { attempts: 3, .. }));
        assert_eq!(err.kind(), "network_failure");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_through_blocked_and_rate_limited() {
        let transport = Arc::new(ScriptedTransport::new().with_sequence(
            URL,
            vec![
                ScriptedTransport::status(403),
                ScriptedTransport::status(429),
                ScriptedTransport::ok("<html>ok</html>"),
            ],
        ));
        let fetcher = fetcher(transport.clone(), 3);

        let started = tokio::time::Instant::now();
        let result = fetcher.fetch(URL, &CancellationToken::new()).await;

        assert_eq!(result, FetchResult::Success("<html>ok</html>".to_string()));
        assert_eq!(transport.calls_to(URL), 3);
        // At least the minimum blocked wait plus the minimum rate-limit wait
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_exhaustion_maps_to_blocked_by_origin() {
        let transport = Arc::new(ScriptedTransport::new().with_status(URL, 403));
        let fetcher = fetcher(transport, 2).with_retry_policy(RetryPolicy::immediate());

        let err = fetcher
            .fetch(URL, &CancellationToken::new())
            .await
            .into_body(URL)
            .unwrap_err();
        assert_eq!(
            err,
            ScrapeError::BlockedByOrigin {
                url: URL.to_string(),
                attempts: 2
            }
        );
    }

    #[tokio::test]
    async fn cancelled_token_prevents_any_request() {
        let transport = Arc::new(ScriptedTransport::new().with_status(URL, 200));
        let fetcher = fetcher(transport.clone(), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(fetcher.fetch(URL, &cancel).await, FetchResult::Cancelled);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let transport = Arc::new(ScriptedTransport::new().with_status(URL, 403));
        let fetcher = fetcher(transport.clone(), 3);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        assert_eq!(fetcher.fetch(URL, &cancel).await, FetchResult::Cancelled);
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn headers_carry_referer_and_pool_agent() {
        let scraping = ScrapingConfig {
            user_agents: vec!["TestAgent/1.0".to_string()],
            ..ScrapingConfig::default()
        };
        let fetcher = Fetcher::with_transport(Arc::new(ScriptedTransport::new()), &scraping);

        let headers = fetcher.build_headers("https://www.amazon.co.uk/dp/B000");
        assert_eq!(headers[USER_AGENT], "TestAgent/1.0");
        assert_eq!(headers[REFERER], "https://www.amazon.co.uk/");
        assert_eq!(headers[ACCEPT_LANGUAGE], "en-GB,en;q=0.9");

        let unknown = fetcher.build_headers("https://shop.example.com/item");
        assert!(unknown.get(REFERER).is_none());
    }

    #[test]
    fn empty_pool_falls_back_to_generated_agent() {
        let scraping = ScrapingConfig {
            user_agents: Vec::new(),
            ..ScrapingConfig::default()
        };
        let fetcher = Fetcher::with_transport(Arc::new(ScriptedTransport::new()), &scraping);
        let headers = fetcher.build_headers(URL);
        let agent = headers[USER_AGENT].to_str().unwrap();
        assert!(agent.contains("Chrome/"));
    }

    #[test]
    fn transient_backoff_doubles() {
        let policy = RetryPolicy {
            jitter: 0.0..0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.transient_wait(1.5, 0), Duration::from_millis(1500));
        assert_eq!(policy.transient_wait(1.5, 1), Duration::from_secs(3));
        assert_eq!(policy.transient_wait(1.5, 2), Duration::from_secs(6));
    }

    #[test]
    fn transient_backoff_is_capped() {
        let policy = RetryPolicy {
            jitter: 0.0..0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.transient_wait(2.0, 10), policy.max_backoff);
        assert_eq!(policy.transient_wait(2.0, 5_000), policy.max_backoff);
        assert_eq!(policy.transient_wait(2.0, u32::MAX), policy.max_backoff);
        assert_eq!(RetryPolicy::immediate().transient_wait(0.0, 40), Duration::ZERO);
    }
}
