//! Pagination strategy implementations

use super::types::{BookmarkFilter, PageToken, PaginationStrategy, TokenSource};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::{RawPage, RequestParams};
use crate::state::Bookmark;
use crate::template::value_to_string;

// ============================================================================
// Cursor Token Pagination
// ============================================================================

/// Opaque cursor-token pagination
///
/// The first request carries the filters (static params, context params and
/// the bookmark filter). Every later request carries only the token and the
/// page size, since the token encodes the rest of the query server-side.
#[derive(Debug, Clone)]
pub struct CursorTokenPaginator {
    /// Query parameter the token is sent under
    token_param: String,
    /// Where the next token is read from
    token_source: TokenSource,
    /// Page size parameter and value
    page_size: Option<(String, u32)>,
    /// Static parameters sent on the first page only
    first_page_params: RequestParams,
    /// (query parameter, context key) pairs sent on the first page
    context_params: Vec<(String, String)>,
    /// Bookmark-derived filter sent on the first page
    filter: BookmarkFilter,
}

impl CursorTokenPaginator {
    /// Create a paginator sending tokens under `token_param`
    pub fn new(token_param: impl Into<String>, token_source: TokenSource) -> Self {
        Self {
            token_param: token_param.into(),
            token_source,
            page_size: None,
            first_page_params: RequestParams::new(),
            context_params: Vec::new(),
            filter: BookmarkFilter::None,
        }
    }

    /// Shopify REST cursor pagination with `limit`
    pub fn shopify(page_size: u32) -> Self {
        Self::new("page_info", TokenSource::shopify()).with_page_size("limit", page_size)
    }

    /// Send a page size on every request
    #[must_use]
    pub fn with_page_size(mut self, param: impl Into<String>, size: u32) -> Self {
        self.page_size = Some((param.into(), size));
        self
    }

    /// Add a static first-page parameter
    #[must_use]
    pub fn with_first_page_param(
        mut self,
        param: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.first_page_params.insert(param.into(), value.into());
        self
    }

    /// Send a context value as a first-page parameter
    #[must_use]
    pub fn with_context_param(mut self, param: impl Into<String>, key: impl Into<String>) -> Self {
        self.context_params.push((param.into(), key.into()));
        self
    }

    /// Set the bookmark filter
    #[must_use]
    pub fn with_filter(mut self, filter: BookmarkFilter) -> Self {
        self.filter = filter;
        self
    }

    /// The configured bookmark filter
    pub fn filter(&self) -> &BookmarkFilter {
        &self.filter
    }
}

impl PaginationStrategy for CursorTokenPaginator {
    fn build_request_params(
        &self,
        stream: &str,
        context: &Context,
        bookmark: &Bookmark,
        token: Option<&PageToken>,
    ) -> Result<RequestParams> {
        let mut params = RequestParams::new();
        if let Some((param, size)) = &self.page_size {
            params.insert(param.clone(), size.to_string());
        }

        if let Some(token) = token {
            params.insert(self.token_param.clone(), token.as_str().to_string());
            return Ok(params);
        }

        params.extend(
            self.first_page_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        insert_context_params(stream, &self.context_params, context, &mut params)?;
        self.filter.apply(bookmark, &mut params);

        Ok(params)
    }

    fn next_page_token(&self, page: &RawPage) -> Option<PageToken> {
        self.token_source.extract(page)
    }
}

// ============================================================================
// Path Template Pagination
// ============================================================================

/// Pagination for child streams whose resource path embeds the context
///
/// The first request sends only context-supplied parameters. When a token
/// source is configured, further pages send only the token.
#[derive(Debug, Clone, Default)]
pub struct PathTemplatePaginator {
    /// (query parameter, context key) pairs sent on the first page
    context_params: Vec<(String, String)>,
    /// Optional token to follow for further pages
    follow: Option<(String, TokenSource)>,
}

impl PathTemplatePaginator {
    /// Create a single-page paginator
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a context value as a first-page parameter
    #[must_use]
    pub fn with_context_param(mut self, param: impl Into<String>, key: impl Into<String>) -> Self {
        self.context_params.push((param.into(), key.into()));
        self
    }

    /// Follow continuation tokens sent under `token_param`
    #[must_use]
    pub fn follow(mut self, token_param: impl Into<String>, source: TokenSource) -> Self {
        self.follow = Some((token_param.into(), source));
        self
    }

    /// Follow Shopify `page_info` links
    #[must_use]
    pub fn follow_shopify(self) -> Self {
        self.follow("page_info", TokenSource::shopify())
    }
}

impl PaginationStrategy for PathTemplatePaginator {
    fn build_request_params(
        &self,
        stream: &str,
        context: &Context,
        _bookmark: &Bookmark,
        token: Option<&PageToken>,
    ) -> Result<RequestParams> {
        let mut params = RequestParams::new();

        match (token, &self.follow) {
            (Some(token), Some((param, _))) => {
                params.insert(param.clone(), token.as_str().to_string());
            }
            (Some(_), None) => {
                return Err(Error::pagination(
                    stream,
                    "received a continuation token but no token parameter is configured",
                ));
            }
            (None, _) => {
                insert_context_params(stream, &self.context_params, context, &mut params)?;
            }
        }

        Ok(params)
    }

    fn next_page_token(&self, page: &RawPage) -> Option<PageToken> {
        self.follow
            .as_ref()
            .and_then(|(_, source)| source.extract(page))
    }
}

fn insert_context_params(
    stream: &str,
    pairs: &[(String, String)],
    context: &Context,
    params: &mut RequestParams,
) -> Result<()> {
    for (param, key) in pairs {
        match context.get(key).filter(|v| !v.is_null()) {
            Some(value) => {
                params.insert(param.clone(), value_to_string(value));
            }
            None => {
                return Err(Error::pagination(
                    stream,
                    format!("context has no value for '{key}' (query parameter '{param}')"),
                ));
            }
        }
    }
    Ok(())
}
