//! Engine types
//!
//! Message types, configuration and statistics for the sync engine.

use crate::error::Result;
use crate::record::Record;
use crate::state::State;
use crate::types::JsonValue;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::Stream;
use serde::Serialize;
use serde_json::json;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Severity of a log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A message emitted during sync
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// One normalized record
    Record {
        /// Stream name
        stream: String,
        /// The record
        record: Record,
        /// When the record was extracted
        time_extracted: DateTime<Utc>,
    },
    /// Snapshot of all bookmarks
    State(State),
    /// Log message
    Log {
        /// Log level
        level: LogLevel,
        /// Log message
        message: String,
    },
}

impl Message {
    /// Create a record message
    pub fn record(stream: impl Into<String>, record: Record) -> Self {
        Self::Record {
            stream: stream.into(),
            record,
            time_extracted: Utc::now(),
        }
    }

    /// Create a state message
    pub fn state(state: State) -> Self {
        Self::State(state)
    }

    /// Create a log message
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
        }
    }

    /// Create an info log
    pub fn info(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Info, message)
    }

    /// Create a warning log
    pub fn warn(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Warn, message)
    }

    /// Create an error log
    pub fn error(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Error, message)
    }

    /// Check if this is a record message
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record { .. })
    }

    /// Check if this is a state message
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }

    /// Check if this is a log message
    pub fn is_log(&self) -> bool {
        matches!(self, Self::Log { .. })
    }

    /// Stream of a record message
    pub fn stream(&self) -> Option<&str> {
        match self {
            Self::Record { stream, .. } => Some(stream),
            _ => None,
        }
    }

    /// Singer-style JSON representation
    pub fn to_json(&self) -> Result<JsonValue> {
        Ok(match self {
            Self::Record {
                stream,
                record,
                time_extracted,
            } => json!({
                "type": "RECORD",
                "stream": stream,
                "record": record.to_json(),
                "time_extracted": time_extracted.to_rfc3339_opts(SecondsFormat::Micros, true),
            }),
            Self::State(state) => json!({
                "type": "STATE",
                "value": serde_json::to_value(state)?,
            }),
            Self::Log { level, message } => json!({
                "type": "LOG",
                "level": level,
                "message": message,
            }),
        })
    }

    /// Serialize as one JSON line
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_json()?)?)
    }
}

/// Lazy stream of messages from a running sync
///
/// Backed by a bounded channel, so the engine pauses when the consumer falls
/// behind. The last item is an `Err` when the run failed. Dropping the
/// stream cancels the run.
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::Receiver<Result<Message>>,
    cancel: CancellationToken,
}

impl MessageStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<Message>>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Cancel the run; pending messages can still be drained
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for MessageStream {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Configuration for sync operation
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Whether to emit state after each page
    pub emit_state_per_page: bool,
    /// Whether to end the run on the first failed unit
    pub fail_fast: bool,
    /// Child units of one parent page allowed in flight (1 = depth-first)
    pub child_concurrency: usize,
    /// Capacity of the message channel
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            emit_state_per_page: false,
            fail_fast: true,
            child_concurrency: 1,
            channel_capacity: 1000,
        }
    }
}

impl SyncConfig {
    /// Create a new sync config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit state after each page
    #[must_use]
    pub fn with_state_per_page(mut self, emit: bool) -> Self {
        self.emit_state_per_page = emit;
        self
    }

    /// Set fail fast mode
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set child concurrency (values below 1 mean 1)
    #[must_use]
    pub fn with_child_concurrency(mut self, n: usize) -> Self {
        self.child_concurrency = n.max(1);
        self
    }

    /// Set the message channel capacity (values below 1 mean 1)
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// Statistics from a sync operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Records emitted
    pub records_synced: usize,
    /// Records filtered as already synced
    pub records_skipped: usize,
    /// Pages fetched
    pub pages_fetched: usize,
    /// Units of work completed
    pub units_completed: usize,
    /// Child units skipped because no context was derived
    pub contexts_skipped: usize,
    /// Units of work that failed
    pub errors: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl SyncStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Add emitted records
    pub fn add_records(&mut self, count: usize) {
        self.records_synced += count;
    }

    /// Add already-synced records
    pub fn add_skipped(&mut self, count: usize) {
        self.records_skipped += count;
    }

    /// Add a page
    pub fn add_page(&mut self) {
        self.pages_fetched += 1;
    }

    /// Add a completed unit
    pub fn add_unit(&mut self) {
        self.units_completed += 1;
    }

    /// Add a skipped child context
    pub fn add_skipped_context(&mut self) {
        self.contexts_skipped += 1;
    }

    /// Add an error
    pub fn add_error(&mut self) {
        self.errors += 1;
    }

    /// Set duration
    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
    }
}
