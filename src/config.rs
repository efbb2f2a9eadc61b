//! Tap configuration
//!
//! `TapConfig` is loaded from a JSON or YAML file and validated once at
//! startup. Everything downstream (HTTP client, sync engine, registry) is
//! configured from it.

use crate::engine::SyncConfig;
use crate::error::{Error, Result};
use crate::http::{HttpClientConfig, RateLimiterConfig};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Admin API version used when none is configured
pub const DEFAULT_API_VERSION: &str = "2024-01";

/// Largest page size the Admin REST API accepts
pub const MAX_PAGE_SIZE: u32 = 250;

// ============================================================================
// Tap Config
// ============================================================================

/// Configuration of a tap run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapConfig {
    /// Shop name (`{store}.myshopify.com`)
    #[serde(default)]
    pub store: String,

    /// Admin API access token
    #[serde(default)]
    pub access_token: String,

    /// Admin API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Base URL override (tests, proxies)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Lower bound for `updated_at` streams without a bookmark (RFC 3339)
    #[serde(default)]
    pub start_date: Option<String>,

    /// Records per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Maximum retries per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sustained request rate; `0` disables pacing
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Child units of one parent page allowed in flight
    #[serde(default = "default_child_concurrency")]
    pub child_concurrency: usize,

    /// Messages buffered ahead of a slow consumer
    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,

    /// Emit a state message after every page
    #[serde(default)]
    pub emit_state_per_page: bool,

    /// End the run on the first failed unit
    #[serde(default = "default_true")]
    pub fail_fast: bool,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_requests_per_second() -> u32 {
    2
}

fn default_child_concurrency() -> usize {
    1
}

fn default_message_buffer() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            store: String::new(),
            access_token: String::new(),
            api_version: default_api_version(),
            base_url: None,
            start_date: None,
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            requests_per_second: default_requests_per_second(),
            child_concurrency: default_child_concurrency(),
            message_buffer: default_message_buffer(),
            emit_state_per_page: false,
            fail_fast: true,
        }
    }
}

impl TapConfig {
    /// Create a config for a store and token
    pub fn new(store: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            access_token: access_token.into(),
            ..Self::default()
        }
    }

    /// Load and validate a config file (`.json`, `.yaml` or `.yml`)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML config
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the base URL override
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the start date
    #[must_use]
    pub fn with_start_date(mut self, date: impl Into<String>) -> Self {
        self.start_date = Some(date.into());
        self
    }

    /// Check required fields and value ranges
    pub fn validate(&self) -> Result<()> {
        if self.store.trim().is_empty() && self.base_url.is_none() {
            return Err(Error::missing_field("store"));
        }
        if self.access_token.trim().is_empty() {
            return Err(Error::missing_field("access_token"));
        }
        if self.api_version.trim().is_empty() {
            return Err(Error::invalid_value("api_version", "must not be empty"));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::invalid_value(
                "page_size",
                format!("must be between 1 and {MAX_PAGE_SIZE}, got {}", self.page_size),
            ));
        }
        if self.child_concurrency == 0 {
            return Err(Error::invalid_value("child_concurrency", "must be at least 1"));
        }
        if self.message_buffer == 0 {
            return Err(Error::invalid_value("message_buffer", "must be at least 1"));
        }
        if let Some(start) = &self.start_date {
            DateTime::parse_from_rfc3339(start).map_err(|e| {
                Error::invalid_value("start_date", format!("'{start}' is not RFC 3339: {e}"))
            })?;
        }
        Ok(())
    }

    /// Admin API base URL
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.myshopify.com/admin/api/{}",
                self.store.trim_end_matches(".myshopify.com"),
                self.api_version
            ),
        }
    }

    /// Start date normalized to UTC (`2024-01-01T00:00:00Z`)
    pub fn start_date_utc(&self) -> Result<Option<String>> {
        self.start_date
            .as_deref()
            .map(|start| {
                DateTime::parse_from_rfc3339(start)
                    .map(|dt| dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true))
                    .map_err(|e| Error::invalid_value("start_date", e.to_string()))
            })
            .transpose()
    }

    /// HTTP client configuration
    pub fn http_config(&self) -> HttpClientConfig {
        let rate_limit = (self.requests_per_second > 0).then(|| {
            RateLimiterConfig::new(
                self.requests_per_second,
                self.requests_per_second.saturating_mul(20),
            )
        });

        HttpClientConfig::new(self.base_url(), &self.access_token)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_retries(self.max_retries)
            .with_rate_limit(rate_limit)
    }

    /// Engine configuration
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new()
            .with_state_per_page(self.emit_state_per_page)
            .with_fail_fast(self.fail_fast)
            .with_child_concurrency(self.child_concurrency)
            .with_channel_capacity(self.message_buffer)
    }
}
