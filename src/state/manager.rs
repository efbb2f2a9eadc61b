//! Bookmark store implementation
//!
//! Holds the working state of a run behind a single lock and persists it to a
//! JSON file with atomic writes. Every update touches exactly one
//! (stream, context) bookmark.

use super::types::{Bookmark, State};
use crate::context::ContextKey;
use crate::error::{Error, Result};
use crate::types::JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Store for per-(stream, context) bookmarks
#[derive(Debug, Clone)]
pub struct BookmarkStore {
    /// Path to the state file (empty for in-memory)
    path: PathBuf,
    /// Current state
    state: Arc<RwLock<State>>,
    /// Serializes concurrent flushes to the same file
    flush_lock: Arc<Mutex<()>>,
}

impl BookmarkStore {
    /// Create a store persisting to the given path, starting empty
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::from_state(State::new()).persist_to(path)
    }

    /// Create an in-memory store (no file persistence)
    pub fn in_memory() -> Self {
        Self::from_state(State::new())
    }

    /// Create an in-memory store seeded with a state
    pub fn from_state(state: State) -> Self {
        Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(state)),
            flush_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a store from a file, loading existing state if present
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| Error::State {
                message: format!("Failed to read state file: {e}"),
            })?;
            parse_state(&contents)?
        } else {
            State::new()
        };

        Ok(Self::from_state(state).persist_to(path))
    }

    /// Create an in-memory store from an inline JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::from_state(parse_state(json)?))
    }

    /// Persist flushes to `path`
    #[must_use]
    pub fn persist_to(mut self, path: impl AsRef<Path>) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    /// Get the bookmark of a (stream, context) unit; empty means full sync
    pub async fn get(&self, stream: &str, key: &ContextKey) -> Bookmark {
        let state = self.state.read().await;
        state.bookmark(stream, key).cloned().unwrap_or_default()
    }

    /// Raise the stored cursor to `max(current, value)`
    pub async fn advance(&self, stream: &str, key: &ContextKey, value: &JsonValue) -> bool {
        let mut state = self.state.write().await;
        state.bookmark_mut(stream, key).advance(value)
    }

    /// Merge a page's pending bookmark into the stored one
    pub async fn merge(&self, stream: &str, key: &ContextKey, pending: &Bookmark) {
        let mut state = self.state.write().await;
        state.bookmark_mut(stream, key).merge(pending);
    }

    /// Set an auxiliary field of a bookmark
    pub async fn set_aux(
        &self,
        stream: &str,
        key: &ContextKey,
        field: impl Into<String>,
        value: JsonValue,
    ) {
        let mut state = self.state.write().await;
        state.bookmark_mut(stream, key).aux.insert(field.into(), value);
    }

    /// Durably persist the current state
    ///
    /// Writes to a temp file and renames it over the state file. A no-op for
    /// in-memory stores.
    pub async fn flush(&self) -> Result<()> {
        if self.is_in_memory() {
            return Ok(());
        }

        let _guard = self.flush_lock.lock().await;
        let contents = self.to_json_pretty().await?;

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::State {
                message: format!("Failed to write state file: {e}"),
            })?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::State {
                message: format!("Failed to rename state file: {e}"),
            })?;

        debug!("Flushed state to {}", self.path.display());
        Ok(())
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> State {
        self.state.read().await.clone()
    }

    /// Export state as JSON string
    pub async fn to_json(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string(&*state).map_err(|e| Error::State {
            message: format!("Failed to serialize state: {e}"),
        })
    }

    /// Export state as pretty-printed JSON string
    pub async fn to_json_pretty(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string_pretty(&*state).map_err(|e| Error::State {
            message: format!("Failed to serialize state: {e}"),
        })
    }

    /// Clear state for a specific stream
    pub async fn clear_stream(&self, stream: &str) {
        let mut state = self.state.write().await;
        state.bookmarks.remove(stream);
    }

    /// Get the state file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if using in-memory mode
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

impl Default for BookmarkStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn parse_state(contents: &str) -> Result<State> {
    serde_json::from_str(contents).map_err(|e| Error::State {
        message: format!("Failed to parse state: {e}"),
    })
}
