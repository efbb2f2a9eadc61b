//! State management module
//!
//! Handles bookmark tracking, checkpointing, and resumability.
//! State is persisted between sync runs to enable incremental syncs.
//!
//! # Overview
//!
//! The state module provides:
//! - `State` - Core state structure with stream and partition bookmarks
//! - `Bookmark` - Cursor value plus auxiliary fields for one unit of work
//! - `BookmarkStore` - Shared, file-backed store with per-key atomic updates

mod manager;
mod types;

pub use manager::BookmarkStore;
pub use types::{compare_values, Bookmark, PartitionState, State, StreamState, KEYS_AT_BOOKMARK};
