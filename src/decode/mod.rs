//! Response decoding module
//!
//! # Overview
//!
//! Shopify REST responses wrap the record array under a resource key
//! (`{"orders": [...]}`). The extractor pulls that array out of a parsed
//! body and hands the engine one JSON object per record.

mod extractor;

pub use extractor::RecordExtractor;
