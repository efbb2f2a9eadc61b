// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # tap-shopify
//!
//! Incremental, resumable extraction of the Shopify Admin REST API as
//! Singer-style record streams.
//!
//! ## Features
//!
//! - **Stream Graph**: Parent/child streams with context propagation
//! - **Cursor Pagination**: `Link` header `page_info` tokens and bookmark filters
//! - **Incremental Sync**: Per-(stream, context) bookmarks, flushed after every page
//! - **Exact Decimals**: Monetary fields normalized without float rounding
//! - **Partial Failure**: Failed units never advance their bookmarks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use tap_shopify::{BookmarkStore, StreamSelection, Tap, TapConfig};
//!
//! #[tokio::main]
//! async fn main() -> tap_shopify::Result<()> {
//!     let config = TapConfig::from_file("config.json")?;
//!     let tap = Tap::new(config)?;
//!
//!     let store = BookmarkStore::from_file("state.json")?;
//!     let mut messages = tap.read(StreamSelection::only(["orders"]), store)?;
//!     while let Some(message) = messages.next().await {
//!         println!("{}", message?.to_json_line()?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          SyncEngine                             │
//! │   roots → pages → records → emit → children → bookmark flush    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬───────────┬───────┴───────┬───────────┬─────────────┐
//! │  Stream  │   HTTP    │   Paginate    │  Context  │   State     │
//! ├──────────┼───────────┼───────────────┼───────────┼─────────────┤
//! │ Graph    │ Retry     │ Cursor token  │ Field     │ Bookmarks   │
//! │ Selection│ Rate Limit│ Path template │ Condition │ Partitions  │
//! │ Registry │ Backoff   │ Link header   │           │ Flush       │
//! └──────────┴───────────┴───────────────┴───────────┴─────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// JSON type aliases
pub mod types;

/// HTTP transport with retry and rate limiting
pub mod http;

/// Pagination strategies
pub mod pagination;

/// Record extraction from page bodies
pub mod decode;

/// Records and normalizers
pub mod record;

/// Child context derivation
pub mod context;

/// Bookmark storage and checkpointing
pub mod state;

/// Stream descriptors, graph and selection
pub mod stream;

/// Main execution engine
pub mod engine;

/// Tap configuration
pub mod config;

/// Shopify stream registry
pub mod streams;

/// Tap wiring
pub mod tap;

/// Path template substitution
pub mod template;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use config::TapConfig;
pub use engine::{Message, MessageStream, SyncConfig, SyncEngine, SyncStats};
pub use state::BookmarkStore;
pub use stream::{StreamDescriptor, StreamGraph, StreamSelection};
pub use tap::Tap;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
