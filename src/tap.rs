//! Tap wiring
//!
//! Builds the transport, stream graph and engine from a [`TapConfig`].

use crate::config::TapConfig;
use crate::engine::{MessageStream, SyncEngine};
use crate::error::Result;
use crate::http::{HttpClient, Transport};
use crate::state::BookmarkStore;
use crate::stream::{CatalogEntry, StreamGraph, StreamSelection};
use crate::streams::{shopify_graph, RegistryOptions};
use std::sync::Arc;
use tracing::info;

/// A configured Shopify tap
#[derive(Clone)]
pub struct Tap {
    config: TapConfig,
    graph: Arc<StreamGraph>,
    transport: Arc<dyn Transport>,
}

impl Tap {
    /// Create a tap talking to the Admin API
    pub fn new(config: TapConfig) -> Result<Self> {
        config.validate()?;
        let client = HttpClient::with_config(config.http_config())?;
        Self::with_transport(config, Arc::new(client))
    }

    /// Create a tap over any transport
    pub fn with_transport(config: TapConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let options = RegistryOptions {
            page_size: config.page_size,
            start_date: config.start_date_utc()?,
        };
        let graph = Arc::new(shopify_graph(&options)?);

        Ok(Self {
            config,
            graph,
            transport,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Get the stream graph
    pub fn graph(&self) -> &StreamGraph {
        &self.graph
    }

    /// Stream names, parents before children
    pub fn stream_names(&self) -> Vec<&str> {
        self.graph
            .topological_order()
            .into_iter()
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Catalog of every stream, parents before children
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.graph
            .topological_order()
            .into_iter()
            .map(|s| s.catalog_entry())
            .collect()
    }

    /// Build an engine for a selection over a bookmark store
    pub fn engine(&self, selection: StreamSelection, store: BookmarkStore) -> SyncEngine {
        SyncEngine::new(self.transport.clone(), self.graph.clone(), store)
            .with_config(self.config.sync_config())
            .with_selection(selection)
    }

    /// Start reading the selected streams
    pub fn read(&self, selection: StreamSelection, store: BookmarkStore) -> Result<MessageStream> {
        let engine = self.engine(selection, store);
        info!(
            "Reading {} stream(s) from {}",
            engine.graph().len(),
            self.config.base_url()
        );
        engine.run()
    }
}

impl std::fmt::Debug for Tap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tap")
            .field("base_url", &self.config.base_url())
            .field("streams", &self.graph.len())
            .finish_non_exhaustive()
    }
}
