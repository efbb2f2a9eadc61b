//! Record normalization module
//!
//! Raw records arrive as JSON objects. Before a record is emitted, and before
//! any of its fields feed child-context derivation, it passes through the
//! stream's normalizer.
//!
//! # Overview
//!
//! The record module provides:
//! - `Record` - A normalized record with exact decimal fields
//! - `RecordNormalizer` - Per-stream normalization hook
//! - `Passthrough` / `DecimalFields` - The two built-in normalizers

mod normalizer;
mod types;

pub use normalizer::{parse_decimal, DecimalFields, Passthrough, RecordNormalizer};
pub use types::Record;
