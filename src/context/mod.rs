//! Context propagation module
//!
//! A parent stream's records seed the requests of its child streams through
//! a [`Context`]: a small ordered mapping such as `{ "order_id": 42 }`.
//!
//! # Overview
//!
//! The context module provides:
//! - `Context` - Parent-derived values for one child unit of work
//! - `ContextKey` - Bookmark partition identity (root or per-context)
//! - `ContextRule` - Per-stream derivation of child contexts
//! - `FieldContext` / `ConditionalContext` - Unconditional and conditional rules

mod rules;
mod types;

pub use rules::{ConditionalContext, ContextRule, FieldContext, RecordPredicate};
pub use types::{Context, ContextKey};
