//! Shopify Admin REST client
//!
//! The production [`Transport`]. Every attempt is paced by the rate
//! limiter and carries the access token. A failed attempt is classified
//! by how Shopify reports it:
//!
//! | Response                          | Action                              |
//! |-----------------------------------|-------------------------------------|
//! | `429 Too Many Requests`           | sleep `Retry-After` seconds, retry  |
//! | `5xx`, timeout, connection error  | sleep the backoff delay, retry      |
//! | any other non-2xx                 | fail the request                    |
//!
//! Retries stop after `max_retries`, returning the last failure.

use super::rate_limit::{RateLimiter, RateLimiterConfig};
use super::transport::{RawPage, RequestParams, Transport};
use crate::error::{Error, Result};
use crate::types::JsonValue;
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the Admin API access token
pub const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// `Retry-After` used when a 429 arrives without one
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(2);

// ============================================================================
// Backoff
// ============================================================================

/// Growth of the delay between retries of transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Same delay every time
    Constant,
    /// `initial * (attempt + 1)`
    Linear,
    /// `initial * 2^attempt`
    #[default]
    Exponential,
}

impl Backoff {
    /// Delay before retry `attempt` (zero-based), capped at `max`
    pub fn delay(self, initial: Duration, attempt: u32, max: Duration) -> Duration {
        let delay = match self {
            Self::Constant => initial,
            Self::Linear => initial.saturating_mul(attempt.saturating_add(1)),
            Self::Exponential => initial.saturating_mul(2u32.saturating_pow(attempt)),
        };
        delay.min(max)
    }
}

// ============================================================================
// Config
// ============================================================================

/// Configuration of the Admin API client
#[derive(Clone)]
pub struct HttpClientConfig {
    /// Admin API base URL, e.g. `https://acme.myshopify.com/admin/api/2024-01`
    pub base_url: String,
    /// Admin API access token
    pub access_token: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff for transient failures
    pub backoff: Backoff,
    /// First backoff delay
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Request pacing; `None` sends as fast as responses arrive
    pub rate_limit: Option<RateLimiterConfig>,
    /// User agent string
    pub user_agent: String,
}

impl HttpClientConfig {
    /// Create a config for a base URL and access token
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: Backoff::Exponential,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            rate_limit: Some(RateLimiterConfig::shopify()),
            user_agent: format!("tap-shopify/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set max retries
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff for transient failures
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff, initial: Duration, max: Duration) -> Self {
        self.backoff = backoff;
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Set or disable request pacing
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimiterConfig>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Delay before retry `attempt` of a transient failure
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff
            .delay(self.initial_backoff, attempt, self.max_backoff)
    }
}

impl std::fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client
// ============================================================================

/// Result of one attempt that did not fail outright
enum Attempt {
    Done(RawPage),
    Throttled { retry_after: Duration },
    Transient(Error),
}

/// Admin API client implementing [`Transport`]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    rate_limiter: Option<RateLimiter>,
}

impl HttpClient {
    /// Create a client
    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;
        let rate_limiter = config.rate_limit.as_ref().map(RateLimiter::new);

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    /// Get the client configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Check if requests are paced
    pub fn has_rate_limiter(&self) -> bool {
        self.rate_limiter.is_some()
    }

    /// Resolve a resource path against the base URL
    ///
    /// Absolute URLs pass through unchanged.
    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Send one request and classify the response
    ///
    /// `Err` means the failure is final.
    async fn attempt(&self, method: &Method, url: &str, params: &RequestParams) -> Result<Attempt> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .header(ACCESS_TOKEN_HEADER, &self.config.access_token);
        if !params.is_empty() {
            request = request.query(params);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = self.config.timeout.as_millis() as u64;
                return Ok(Attempt::Transient(Error::Timeout { timeout_ms }));
            }
            Err(e) if e.is_connect() => return Ok(Attempt::Transient(Error::Http(e))),
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Attempt::Throttled {
                retry_after: retry_after(&response),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = Error::http_status(status.as_u16(), body);
            return if status.is_server_error() {
                Ok(Attempt::Transient(error))
            } else {
                Err(error)
            };
        }

        let headers = response.headers().clone();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_str(&text)?
        };

        Ok(Attempt::Done(RawPage {
            status: status.as_u16(),
            headers,
            body,
        }))
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn execute(
        &self,
        method: Method,
        path: &str,
        params: &RequestParams,
    ) -> Result<RawPage> {
        let url = self.url_for(path);
        let max_retries = self.config.max_retries;
        let mut attempt = 0;

        loop {
            if let Some(limiter) = &self.rate_limiter {
                limiter.wait().await;
            }

            let (error, delay) = match self.attempt(&method, &url, params).await? {
                Attempt::Done(page) => {
                    debug!("{method} {url} -> {}", page.status);
                    return Ok(page);
                }
                Attempt::Throttled { retry_after } => {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let retry_after_seconds = retry_after.as_secs_f64().ceil() as u64;
                    (Error::RateLimited { retry_after_seconds }, retry_after)
                }
                Attempt::Transient(error) => (error, self.config.backoff_delay(attempt)),
            };

            if attempt >= max_retries {
                return Err(error);
            }
            attempt += 1;
            warn!("{error}; retry {attempt}/{max_retries} of {url} in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("has_rate_limiter", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

/// `Retry-After` of a 429
///
/// Shopify sends fractional seconds such as `2.0`.
fn retry_after(response: &Response) -> Duration {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs_f64)
}
