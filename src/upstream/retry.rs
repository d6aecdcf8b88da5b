//! Retry policy and the retrying HTTP transport.
//!
//! [`RetryingTransport::send`] performs one logical request as up to
//! `max_retries + 1` physical attempts. A response is terminal when it is
//! a success or a client error other than 429; everything else (429, 5xx,
//! timeouts, connection failures) is retried with exponential backoff.
//! Exhausting all attempts yields `None`, which callers treat as "the
//! service is unreachable" rather than as an HTTP error.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::is_retryable_status;
use crate::{BragiError, Result, telemetry};

/// Configuration for retry behaviour on transient errors.
///
/// Backoff is exponential without jitter: the n-th retry waits
/// `base_delay * 2^n`, capped at `max_delay`.
///
/// ```rust
/// # use bragi::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_retries(3)
///     .base_delay(Duration::from_millis(100));
/// assert_eq!(config.delay_for_retry(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the initial attempt. 0 = no retry. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 100ms.
    pub base_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 30s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the number of retries after the initial attempt.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Total physical attempts per logical request.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(retry));
        delay.min(self.max_delay)
    }
}

/// A request description that can be replayed for every attempt.
///
/// Each attempt builds a fresh `reqwest` request from this value, so the
/// body is never consumed by a failed attempt.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: Option<Bytes>,
}

impl UpstreamRequest {
    /// A `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            bearer: None,
            body: None,
        }
    }

    /// A `POST` request with a JSON body.
    pub fn post_json<T: serde::Serialize>(url: impl Into<String>, body: &T) -> Result<Self> {
        Ok(Self {
            method: Method::POST,
            url: url.into(),
            bearer: None,
            body: Some(Bytes::from(serde_json::to_vec(body)?)),
        })
    }

    /// Attach a bearer token; empty or absent keys add no header.
    pub fn bearer(mut self, key: Option<&str>) -> Self {
        self.bearer = key.filter(|k| !k.is_empty()).map(str::to_owned);
        self
    }

    fn build(&self, http: &Client) -> reqwest::RequestBuilder {
        let mut builder = http.request(self.method.clone(), &self.url);
        if let Some(ref key) = self.bearer
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}"))
        {
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(ref body) = self.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }
        builder
    }
}

/// Whether a response ends the retry loop.
fn is_terminal(status: StatusCode) -> bool {
    status.is_success() || !is_retryable_status(status.as_u16())
}

/// HTTP client wrapper that retries transient failures.
#[derive(Debug, Clone)]
pub struct RetryingTransport {
    http: Client,
    config: RetryConfig,
}

impl RetryingTransport {
    /// Build a transport with the given per-attempt timeout.
    pub fn new(timeout: Duration, config: RetryConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(crate::version::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|e| BragiError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Perform a single attempt with no retry.
    pub async fn send_once(&self, request: &UpstreamRequest) -> reqwest::Result<Response> {
        request.build(&self.http).send().await
    }

    /// Send `request`, retrying transient failures.
    ///
    /// Returns the first terminal response, or `None` once every attempt
    /// ended in a retryable status or a transport error.
    pub async fn send(&self, operation: &str, request: &UpstreamRequest) -> Option<Response> {
        let attempts = self.config.max_attempts();
        for attempt in 0..attempts {
            let is_last = attempt + 1 == attempts;
            let failure = match self.send_once(request).await {
                Ok(response) if is_terminal(response.status()) => return Some(response),
                Ok(response) => format!("status {}", response.status()),
                Err(e) if e.is_timeout() => "timed out".to_string(),
                Err(e) => e.to_string(),
            };

            if is_last {
                warn!(
                    operation,
                    url = %request.url,
                    attempts,
                    error = %failure,
                    "upstream request failed after all retries"
                );
                break;
            }

            metrics::counter!(telemetry::RETRIES_TOTAL, "operation" => operation.to_owned())
                .increment(1);
            let delay = self.config.delay_for_retry(attempt);
            debug!(
                operation,
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "retrying upstream request"
            );
            tokio::time::sleep(delay).await;
        }
        None
    }
}
