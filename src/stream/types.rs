//! Stream descriptor types

use crate::context::{Context, ContextKey, ContextRule};
use crate::decode::RecordExtractor;
use crate::error::Result;
use crate::pagination::{PaginationStrategy, PathTemplatePaginator};
use crate::record::{Passthrough, RecordNormalizer};
use crate::types::{JsonObject, JsonValue};
use serde::Serialize;
use std::sync::Arc;

/// Static definition of one resource stream
///
/// Strategy objects are shared through `Arc`, so descriptors derived with
/// [`StreamDescriptor::reuse_as`] reuse behavior but never bookmarks.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    /// Unique stream name
    pub name: String,
    /// Resource path template, e.g. `/orders/{order_id}/refunds.json`
    pub resource_path: String,
    /// Locator of the records within a page body
    pub records_path: String,
    /// Fields forming the record identity
    pub primary_key: Vec<String>,
    /// Incremental cursor field; absent means full refresh
    pub replication_key: Option<String>,
    /// Parent stream name; absent marks a root stream
    pub parent: Option<String>,
    /// Sync this child independently of the parent's bookmark state
    pub ignore_parent_replication_key: bool,
    /// Request parameters and continuation
    pub pagination: Arc<dyn PaginationStrategy>,
    /// Per-record normalization
    pub normalizer: Arc<dyn RecordNormalizer>,
    /// Derivation of contexts for this stream's children
    pub context_rule: Option<Arc<dyn ContextRule>>,
}

impl StreamDescriptor {
    /// Create a root, full-refresh stream with single-page pagination
    pub fn new(
        name: impl Into<String>,
        resource_path: impl Into<String>,
        records_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource_path: resource_path.into(),
            records_path: records_path.into(),
            primary_key: vec!["id".to_string()],
            replication_key: None,
            parent: None,
            ignore_parent_replication_key: false,
            pagination: Arc::new(PathTemplatePaginator::new()),
            normalizer: Arc::new(Passthrough),
            context_rule: None,
        }
    }

    /// Set the primary key fields
    #[must_use]
    pub fn with_primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the replication key
    #[must_use]
    pub fn with_replication_key(mut self, field: impl Into<String>) -> Self {
        self.replication_key = Some(field.into());
        self
    }

    /// Set the parent stream
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Run this child for every parent record, synced or not
    #[must_use]
    pub fn ignoring_parent_replication_key(mut self) -> Self {
        self.ignore_parent_replication_key = true;
        self
    }

    /// Set the pagination strategy
    #[must_use]
    pub fn with_pagination(mut self, pagination: impl PaginationStrategy + 'static) -> Self {
        self.pagination = Arc::new(pagination);
        self
    }

    /// Set the normalizer
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: impl RecordNormalizer + 'static) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    /// Set the child context rule
    #[must_use]
    pub fn with_context_rule(mut self, rule: impl ContextRule + 'static) -> Self {
        self.context_rule = Some(Arc::new(rule));
        self
    }

    /// Derive a distinct stream sharing this one's strategy objects
    pub fn reuse_as(
        &self,
        name: impl Into<String>,
        resource_path: impl Into<String>,
        parent: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            resource_path: resource_path.into(),
            parent: parent.map(str::to_string),
            ..self.clone()
        }
    }

    /// Check if this is a root stream
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Check if this stream syncs incrementally
    pub fn is_incremental(&self) -> bool {
        self.replication_key.is_some()
    }

    /// Replication method implied by the replication key
    pub fn replication_method(&self) -> ReplicationMethod {
        if self.is_incremental() {
            ReplicationMethod::Incremental
        } else {
            ReplicationMethod::FullTable
        }
    }

    /// Bookmark key of a unit of this stream
    pub fn context_key(&self, context: &Context) -> ContextKey {
        ContextKey::for_stream(!self.is_root(), context)
    }

    /// Extract raw records from a page body
    pub fn extract_records(&self, body: &JsonValue) -> Result<Vec<JsonObject>> {
        RecordExtractor::new(self.records_path.as_str()).extract(body)
    }

    /// Catalog entry describing this stream
    pub fn catalog_entry(&self) -> CatalogEntry {
        CatalogEntry {
            stream: self.name.clone(),
            key_properties: self.primary_key.clone(),
            replication_key: self.replication_key.clone(),
            replication_method: self.replication_method(),
            parent: self.parent.clone(),
        }
    }
}

/// How a stream is replicated, as named in Singer catalogs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMethod {
    /// Every run reads the whole resource
    FullTable,
    /// Runs resume from a bookmark on the replication key
    Incremental,
}

/// One stream in the discovered catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    /// Stream name
    pub stream: String,
    /// Primary key fields
    pub key_properties: Vec<String>,
    /// Replication key, if incremental
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    /// Full table or incremental
    pub replication_method: ReplicationMethod,
    /// Parent stream, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}
