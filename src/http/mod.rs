//! HTTP transport module
//!
//! Provides the transport seam the engine fetches through, and the
//! production client behind it.
//!
//! # Features
//!
//! - **Transport trait**: One `execute` operation returning a [`RawPage`]
//! - **Retries**: 429 honours `Retry-After`, 5xx and timeouts back off
//! - **Rate Limiting**: Token bucket rate limiter using governor
//! - **Authentication**: Admin API access token header

mod client;
mod rate_limit;
mod transport;

pub use client::{Backoff, HttpClient, HttpClientConfig, ACCESS_TOKEN_HEADER};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use transport::{RawPage, RequestParams, Transport};
