//! Pagination types and traits
//!
//! Defines the strategy trait used by the engine and the building blocks
//! shared by all strategies.

use crate::context::Context;
use crate::error::Result;
use crate::http::{RawPage, RequestParams};
use crate::state::Bookmark;
use crate::template::value_to_string;
use jsonpath_rust::JsonPath;
use serde_json::Value;
use std::fmt;
use url::Url;

/// Opaque continuation token returned by a page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageToken(String);

impl PageToken {
    /// Create a token; empty strings are not tokens
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    /// The raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a page's continuation token comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// A value inside the response body
    Body {
        /// Dotted path or JSONPath to the token
        path: String,
    },

    /// A query parameter of a `Link` header URL (RFC 8288)
    LinkHeader {
        /// Rel value to follow (usually "next")
        rel: String,
        /// Query parameter of the linked URL carrying the token
        param: String,
    },
}

impl TokenSource {
    /// Token in the response body
    pub fn body(path: impl Into<String>) -> Self {
        Self::Body { path: path.into() }
    }

    /// Token in a `Link` header URL
    pub fn link_header(rel: impl Into<String>, param: impl Into<String>) -> Self {
        Self::LinkHeader {
            rel: rel.into(),
            param: param.into(),
        }
    }

    /// Shopify cursor pagination: `Link: <...?page_info=abc>; rel="next"`
    pub fn shopify() -> Self {
        Self::link_header("next", "page_info")
    }

    /// Extract the token of the next page, if any
    pub fn extract(&self, page: &RawPage) -> Option<PageToken> {
        match self {
            Self::Body { path } => extract_body_value(&page.body, path)
                .filter(|v| !v.is_null())
                .and_then(|v| PageToken::new(value_to_string(&v))),
            Self::LinkHeader { rel, param } => {
                let header = page.header("link")?;
                let target = parse_link_header(header, rel)?;
                let url = Url::parse(&target).ok()?;
                let token = url
                    .query_pairs()
                    .find(|(k, _)| k == param.as_str())
                    .map(|(_, v)| v.into_owned())?;
                PageToken::new(token)
            }
        }
    }
}

/// Server-side filter seeded from the prior bookmark on the first page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BookmarkFilter {
    /// No server-side filter
    #[default]
    None,

    /// Only records with an id above the bookmark (`since_id`)
    SinceId {
        /// Query parameter name
        param: String,
    },

    /// Only records updated at or after the bookmark (`updated_at_min`)
    ReplicationKeyMin {
        /// Query parameter name
        param: String,
        /// Lower bound used when there is no bookmark yet
        start: Option<String>,
    },
}

impl BookmarkFilter {
    /// `since_id` filter
    pub fn since_id() -> Self {
        Self::SinceId {
            param: "since_id".to_string(),
        }
    }

    /// `updated_at_min` filter with an optional start date
    pub fn updated_at_min(start: Option<String>) -> Self {
        Self::ReplicationKeyMin {
            param: "updated_at_min".to_string(),
            start,
        }
    }

    /// Add the filter parameter to `params`
    ///
    /// Nothing is added when neither a bookmark nor a start value exists.
    pub fn apply(&self, bookmark: &Bookmark, params: &mut RequestParams) {
        match self {
            Self::None => {}
            Self::SinceId { param } => {
                if let Some(value) = bookmark.value() {
                    params.insert(param.clone(), value_to_string(value));
                }
            }
            Self::ReplicationKeyMin { param, start } => {
                let lower = bookmark
                    .value()
                    .map(value_to_string)
                    .or_else(|| start.clone())
                    .filter(|s| !s.is_empty());
                if let Some(lower) = lower {
                    params.insert(param.clone(), lower);
                }
            }
        }
    }
}

/// Strategy deciding request parameters and continuation for one stream
///
/// Context and the prior bookmark are explicit inputs; strategies hold no
/// per-run state so one instance can serve every unit of a stream.
pub trait PaginationStrategy: Send + Sync + fmt::Debug {
    /// Query parameters for the next request of a unit
    ///
    /// `token` is `None` on the first page.
    fn build_request_params(
        &self,
        stream: &str,
        context: &Context,
        bookmark: &Bookmark,
        token: Option<&PageToken>,
    ) -> Result<RequestParams>;

    /// Continuation token of a fetched page; `None` ends the unit
    fn next_page_token(&self, page: &RawPage) -> Option<PageToken>;
}

/// Parse a Link header and extract the URL for the given rel
fn parse_link_header(header: &str, target_rel: &str) -> Option<String> {
    // <url>; rel="next", <url>; rel="previous"
    for part in header.split(',') {
        let part = part.trim();
        let mut url = None;
        let mut rel = None;

        for segment in part.split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(stripped) = segment.strip_prefix("rel=") {
                rel = Some(stripped.trim_matches('"').trim_matches('\''));
            }
        }

        if let (Some(u), Some(r)) = (url, rel) {
            if r == target_rel {
                return Some(u.to_string());
            }
        }
    }

    None
}

fn extract_body_value(body: &Value, path: &str) -> Option<Value> {
    if path.contains('*') {
        let jp = JsonPath::try_from(path).ok()?;
        return match jp.find(body) {
            Value::Array(mut arr) => arr.pop(),
            Value::Null => None,
            other => Some(other),
        };
    }

    let path = path.strip_prefix("$.").unwrap_or(path);
    path.split('.').try_fold(body, |current, part| current.get(part)).cloned()
}
