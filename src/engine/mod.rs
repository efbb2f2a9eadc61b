//! Extraction engine module
//!
//! Traverses the stream graph top-down and runs one page loop per
//! (stream, context) unit of work.
//!
//! # Overview
//!
//! The engine module provides:
//! - `SyncEngine` - Orchestrates extraction with bookmark management
//! - `SyncConfig` - Configuration for sync operations
//! - `MessageStream` - Lazy output of Record, State and Log messages
//!
//! Each page is fetched, its records extracted and normalized, child
//! contexts derived, and only then are records emitted. Child units run
//! to completion before the parent's bookmark for that page is merged and
//! flushed, so a flushed bookmark never covers unfinished work.
//!
//! When failures are tolerated (`fail_fast = false`), a unit whose child
//! unit failed stops merging its bookmark for the rest of the run. The next
//! run then revisits the parent records and retries the failed children.

mod types;

pub use types::{LogLevel, Message, MessageStream, SyncConfig, SyncStats};

use crate::context::{Context, ContextKey};
use crate::error::{Error, Result};
use crate::http::Transport;
use crate::pagination::PageToken;
use crate::record::Record;
use crate::state::{Bookmark, BookmarkStore};
use crate::stream::{StreamDescriptor, StreamGraph, StreamSelection};
use crate::template;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt};
use reqwest::Method;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sync engine for orchestrating incremental extraction
#[derive(Clone)]
pub struct SyncEngine {
    /// Page fetcher
    transport: Arc<dyn Transport>,
    /// Stream definitions
    graph: Arc<StreamGraph>,
    /// Bookmark store
    store: BookmarkStore,
    /// Sync configuration
    config: SyncConfig,
    /// Which streams to emit
    selection: StreamSelection,
    /// Run cancellation
    cancel: CancellationToken,
    /// Statistics
    stats: Arc<Mutex<SyncStats>>,
}

impl SyncEngine {
    /// Create a new sync engine
    pub fn new(transport: Arc<dyn Transport>, graph: Arc<StreamGraph>, store: BookmarkStore) -> Self {
        Self {
            transport,
            graph,
            store,
            config: SyncConfig::default(),
            selection: StreamSelection::all(),
            cancel: CancellationToken::new(),
            stats: Arc::new(Mutex::new(SyncStats::default())),
        }
    }

    /// Set sync configuration
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the stream selection
    #[must_use]
    pub fn with_selection(mut self, selection: StreamSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Use an externally owned cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Get the bookmark store
    pub fn store(&self) -> &BookmarkStore {
        &self.store
    }

    /// Get the stream graph
    pub fn graph(&self) -> &StreamGraph {
        &self.graph
    }

    /// Get the sync configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Token cancelling the run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot of the statistics
    pub async fn stats(&self) -> SyncStats {
        self.stats.lock().await.clone()
    }

    /// Start the run and return its message stream
    ///
    /// Selection errors are returned before anything is fetched. Must be
    /// called within a Tokio runtime.
    pub fn run(&self) -> Result<MessageStream> {
        self.selection.validate(&self.graph)?;

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let run = Run {
            engine: self.clone(),
            tx,
        };
        tokio::spawn(async move { run.execute().await });

        Ok(MessageStream::new(rx, self.cancel.clone()))
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("streams", &self.graph.len())
            .field("config", &self.config)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Run
// ============================================================================

/// One normalized record of a page with its traversal decisions
struct PageRecord {
    record: Record,
    /// Already covered by the unit's starting bookmark
    synced: bool,
    /// Child context derived from the record
    context: Option<Context>,
}

/// A single execution of the engine feeding one message channel
struct Run {
    engine: SyncEngine,
    tx: mpsc::Sender<Result<Message>>,
}

impl Run {
    async fn execute(self) {
        let start = Instant::now();
        let engine = &self.engine;
        info!("Starting sync of {} stream(s)", engine.graph.len());

        let mut outcome = Ok(());
        for root in engine.graph.roots() {
            if !engine.selection.is_required(&engine.graph, &root.name) {
                continue;
            }
            if let Err(e) = self.guarded_unit(root, Context::new()).await {
                outcome = Err(e);
                break;
            }
        }

        if let Err(e) = engine.store.flush().await {
            error!("Failed to flush final state: {e}");
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }

        let failed = {
            let mut stats = engine.stats.lock().await;
            #[allow(clippy::cast_possible_truncation)]
            stats.set_duration(start.elapsed().as_millis() as u64);
            info!(
                "Sync finished: {} records, {} pages, {} units, {} errors in {}ms",
                stats.records_synced,
                stats.pages_fetched,
                stats.units_completed,
                stats.errors,
                stats.duration_ms
            );
            stats.errors
        };

        // The final state is sent even when the run failed or was cancelled
        let snapshot = engine.store.snapshot().await;
        let _ = self.tx.send(Ok(Message::state(snapshot))).await;

        let outcome = match outcome {
            Ok(()) if failed > 0 => Err(Error::UnitsFailed { failed }),
            other => other,
        };
        if let Err(e) = outcome {
            let _ = self.tx.send(Err(e)).await;
        }
    }

    /// Run a unit and apply the failure policy
    ///
    /// Failures are reported where they happen; here they are either
    /// swallowed (to continue with siblings) or propagated to end the run.
    /// Resolves to `true` when the unit and all of its descendants
    /// completed.
    fn guarded_unit<'a>(
        &'a self,
        stream: &'a StreamDescriptor,
        context: Context,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            match self.run_unit(stream, context).await {
                Ok(complete) => Ok(complete),
                Err(e @ Error::Cancelled { .. }) => Err(e),
                Err(e) if self.engine.config.fail_fast => Err(e),
                Err(_) => Ok(false),
            }
        }
        .boxed()
    }

    /// The page loop of one (stream, context) unit
    ///
    /// Returns whether every child unit driven from it completed.
    async fn run_unit(&self, stream: &StreamDescriptor, context: Context) -> Result<bool> {
        let engine = &self.engine;
        let key = stream.context_key(&context);
        let emit = engine.selection.is_selected(&stream.name);
        let start_bookmark = engine.store.get(&stream.name, &key).await;

        let path = match template::render_path(&stream.resource_path, &context) {
            Ok(path) => path,
            Err(e) => return Err(self.report(e.in_unit(&stream.name, key.to_string(), 0)).await),
        };

        debug!(
            "Starting unit {} {} (bookmark: {:?})",
            stream.name,
            key,
            start_bookmark.value()
        );

        let mut token: Option<PageToken> = None;
        let mut page_number = 0usize;
        let mut held = false;

        loop {
            if engine.cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    stream: stream.name.clone(),
                });
            }
            page_number += 1;

            let page = self
                .fetch_page(stream, &context, &start_bookmark, &path, token.as_ref())
                .await;
            let (records, next_token) = match page {
                Ok(page) => page,
                Err(e) => {
                    return Err(self
                        .report(e.in_unit(&stream.name, key.to_string(), page_number))
                        .await)
                }
            };

            if let (Some(prev), Some(next)) = (&token, &next_token) {
                if prev == next {
                    let e = Error::pagination(
                        &stream.name,
                        format!("page token '{next}' repeated; pagination is not advancing"),
                    );
                    return Err(self
                        .report(e.in_unit(&stream.name, key.to_string(), page_number))
                        .await);
                }
            }

            let (pending, children_complete) = self
                .emit_page(stream, &key, emit, &start_bookmark, records)
                .await?;

            if !children_complete && !held {
                warn!(
                    "Child unit of {} {} failed on page {}; holding its bookmark",
                    stream.name, key, page_number
                );
                held = true;
            }

            if emit && stream.is_incremental() && !held {
                engine.store.merge(&stream.name, &key, &pending).await;
                if let Err(e) = engine.store.flush().await {
                    return Err(self
                        .report(e.in_unit(&stream.name, key.to_string(), page_number))
                        .await);
                }
                if engine.config.emit_state_per_page {
                    let snapshot = engine.store.snapshot().await;
                    self.send(&stream.name, Message::state(snapshot)).await?;
                }
            }

            match next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        if !held {
            engine.stats.lock().await.add_unit();
        }
        debug!("Finished unit {} {} after {} page(s)", stream.name, key, page_number);
        Ok(!held)
    }

    /// Fetch one page and turn it into normalized records with their
    /// derived child contexts
    ///
    /// Nothing is emitted here, so a failure leaves the page unprocessed.
    async fn fetch_page(
        &self,
        stream: &StreamDescriptor,
        context: &Context,
        start_bookmark: &Bookmark,
        path: &str,
        token: Option<&PageToken>,
    ) -> Result<(Vec<PageRecord>, Option<PageToken>)> {
        let engine = &self.engine;
        let params = stream
            .pagination
            .build_request_params(&stream.name, context, start_bookmark, token)?;

        let page = engine.transport.execute(Method::GET, path, &params).await?;
        engine.stats.lock().await.add_page();

        let raw_records = stream.extract_records(&page.body)?;
        let next_token = stream.pagination.next_page_token(&page);
        debug!(
            "Fetched {} record(s) from {} (next page: {})",
            raw_records.len(),
            path,
            next_token.is_some()
        );

        let children = self.required_children(stream);
        let any_child = !children.is_empty();
        let drive_synced = children.iter().any(|c| c.ignore_parent_replication_key);

        let mut records = Vec::with_capacity(raw_records.len());
        for raw in raw_records {
            let record = stream.normalizer.normalize(&stream.name, raw)?;
            let synced = is_synced(stream, start_bookmark, &record);

            let context = match &stream.context_rule {
                Some(rule) if any_child && (!synced || drive_synced) => {
                    rule.derive(&stream.name, &record)?
                }
                _ => None,
            };

            records.push(PageRecord {
                record,
                synced,
                context,
            });
        }

        Ok((records, next_token))
    }

    /// Emit a page's records and drive their child units
    ///
    /// Returns the page's pending bookmark and whether all child units
    /// completed.
    async fn emit_page(
        &self,
        stream: &StreamDescriptor,
        key: &ContextKey,
        emit: bool,
        start_bookmark: &Bookmark,
        records: Vec<PageRecord>,
    ) -> Result<(Bookmark, bool)> {
        let engine = &self.engine;
        let children = self.required_children(stream);

        let mut pending = Bookmark::new();
        pending.replication_key.clone_from(&stream.replication_key);
        if let Some(value) = start_bookmark.value() {
            pending.advance(value);
        }

        let skipped = records.iter().filter(|r| r.synced).count();
        if skipped > 0 {
            debug!("Skipping {skipped} already-synced record(s) of {} {key}", stream.name);
            engine.stats.lock().await.add_skipped(skipped);
        }

        let concurrent = engine.config.child_concurrency > 1;
        let mut deferred = Vec::new();
        let mut complete = true;

        for page_record in records {
            let PageRecord {
                record,
                synced,
                context,
            } = page_record;

            if !synced {
                if let Some(field) = &stream.replication_key {
                    if let Some(value) = record.value(field).filter(|v| !v.is_null()) {
                        pending.observe(&value, &record.key(&stream.primary_key));
                    }
                }
                if emit {
                    let record = engine.selection.project(stream, record);
                    self.send(&stream.name, Message::record(&stream.name, record))
                        .await?;
                    engine.stats.lock().await.add_records(1);
                }
            }

            if children.is_empty() {
                continue;
            }

            if concurrent {
                deferred.push((synced, context));
            } else {
                complete &= self.drive_children(&children, synced, context.as_ref()).await?;
            }
        }

        if concurrent {
            for child in &children {
                let candidates: Vec<&Option<Context>> = deferred
                    .iter()
                    .filter(|(synced, _)| !*synced || child.ignore_parent_replication_key)
                    .map(|(_, ctx)| ctx)
                    .collect();
                let contexts: Vec<Context> = candidates.iter().filter_map(|c| (*c).clone()).collect();

                let no_context = candidates.len() - contexts.len();
                if no_context > 0 {
                    engine.stats.lock().await.contexts_skipped += no_context;
                }

                let outcomes = futures::stream::iter(contexts)
                    .map(|ctx| self.guarded_unit(child, ctx))
                    .buffer_unordered(engine.config.child_concurrency)
                    .try_collect::<Vec<bool>>()
                    .await?;
                complete &= outcomes.into_iter().all(|done| done);
            }
        }

        Ok((pending, complete))
    }

    /// Run every required child of one parent record, depth-first
    async fn drive_children(
        &self,
        children: &[&StreamDescriptor],
        synced: bool,
        context: Option<&Context>,
    ) -> Result<bool> {
        let mut complete = true;
        for child in children {
            if synced && !child.ignore_parent_replication_key {
                continue;
            }
            match context {
                Some(ctx) => complete &= self.guarded_unit(child, ctx.clone()).await?,
                None => {
                    debug!("No context for {}; skipping child unit", child.name);
                    self.engine.stats.lock().await.add_skipped_context();
                }
            }
        }
        Ok(complete)
    }

    fn required_children(&self, stream: &StreamDescriptor) -> Vec<&StreamDescriptor> {
        let engine = &self.engine;
        engine
            .graph
            .children_of(&stream.name)
            .filter(|c| engine.selection.is_required(&engine.graph, &c.name))
            .collect()
    }

    /// Send a message, treating a closed channel as cancellation
    async fn send(&self, stream: &str, message: Message) -> Result<()> {
        if self.tx.send(Ok(message)).await.is_err() {
            warn!("Message consumer went away; cancelling sync");
            self.engine.cancel.cancel();
            return Err(Error::Cancelled {
                stream: stream.to_string(),
            });
        }
        Ok(())
    }

    /// Log and count a unit failure
    async fn report(&self, err: Error) -> Error {
        error!("{err}");
        self.engine.stats.lock().await.add_error();
        let _ = self.tx.send(Ok(Message::error(err.to_string()))).await;
        err
    }
}

/// Check a record against the unit's starting bookmark
fn is_synced(stream: &StreamDescriptor, bookmark: &Bookmark, record: &Record) -> bool {
    let Some(field) = &stream.replication_key else {
        return false;
    };
    match record.value(field).filter(|v| !v.is_null()) {
        Some(value) => bookmark.is_synced(&value, &record.key(&stream.primary_key)),
        None => false,
    }
}

#[cfg(test)]
mod tests;
