//! Pagination module
//!
//! Supports: opaque cursor tokens (body or `Link` header), path-templated
//! child requests
//!
//! # Overview
//!
//! A strategy turns (stream, context, prior bookmark, page token) into the
//! query parameters of the next request, and reads the continuation token
//! of each fetched page. An absent or empty token ends the unit.

mod strategies;
mod types;

pub use strategies::{CursorTokenPaginator, PathTemplatePaginator};
pub use types::{BookmarkFilter, PageToken, PaginationStrategy, TokenSource};
