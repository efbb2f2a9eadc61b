//! Transport abstraction consumed by the extraction engine
//!
//! The engine only needs one operation: fetch a resolved path with a set of
//! query parameters and get back a page. Authentication, retries and
//! pacing live behind this trait.

use crate::error::Result;
use crate::types::JsonValue;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::collections::BTreeMap;

/// Query parameters for one request, in a deterministic order
pub type RequestParams = BTreeMap<String, String>;

/// One fetched response
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    /// HTTP status code
    pub status: u16,
    /// Response headers (pagination links live here)
    pub headers: HeaderMap,
    /// Parsed JSON body
    pub body: JsonValue,
}

impl RawPage {
    /// Create a 200 page with a JSON body and no headers
    pub fn new(body: JsonValue) -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Add a header
    ///
    /// Invalid header names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(name, value);
        }
        self
    }

    /// Get a header as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Executes requests for the engine
///
/// Implementations retry retryable failures themselves; an `Err` returned
/// here is final for the current unit of work.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a request against a resolved resource path
    async fn execute(&self, method: Method, path: &str, params: &RequestParams)
        -> Result<RawPage>;
}
