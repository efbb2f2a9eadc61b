//! Stream descriptor graph module
//!
//! # Overview
//!
//! The stream module provides:
//! - `StreamDescriptor` - Static definition of one resource stream
//! - `StreamGraph` - Validated parent/child forest of streams
//! - `StreamSelection` - Which streams and fields a run emits
//! - `CatalogEntry` - Discoverable description of a stream

mod graph;
mod selection;
mod types;

pub use graph::StreamGraph;
pub use selection::StreamSelection;
pub use types::{CatalogEntry, ReplicationMethod, StreamDescriptor};
