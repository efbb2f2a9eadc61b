//! State types for tracking sync progress
//!
//! These types are serialized to JSON and persisted between runs. The layout
//! follows the Singer convention: one entry per stream under `bookmarks`,
//! with child streams keeping one bookmark per parent context in
//! `partitions`.

use crate::context::{Context, ContextKey};
use crate::template::value_to_string;
use crate::types::{JsonObject, JsonValue};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Auxiliary field listing the primary keys already emitted at the bookmark value
pub const KEYS_AT_BOOKMARK: &str = "keys_at_bookmark";

/// Complete state for a tap run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Per-stream state
    #[serde(default)]
    pub bookmarks: BTreeMap<String, StreamState>,
}

impl State {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get state for a stream
    pub fn get_stream(&self, stream: &str) -> Option<&StreamState> {
        self.bookmarks.get(stream)
    }

    /// Get mutable state for a stream, creating if needed
    pub fn get_stream_mut(&mut self, stream: &str) -> &mut StreamState {
        self.bookmarks.entry(stream.to_string()).or_default()
    }

    /// Get the bookmark of one (stream, context) partition
    pub fn bookmark(&self, stream: &str, key: &ContextKey) -> Option<&Bookmark> {
        self.get_stream(stream)?.bookmark(key)
    }

    /// Get the mutable bookmark of one partition, creating if needed
    pub fn bookmark_mut(&mut self, stream: &str, key: &ContextKey) -> &mut Bookmark {
        self.get_stream_mut(stream).bookmark_mut(key)
    }
}

/// State for a single stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StreamStateRepr", into = "StreamStateRepr")]
pub struct StreamState {
    /// Bookmark of the stream when it has no parent
    pub root: Bookmark,
    /// Per-context bookmarks, indexed by context identity
    partitions: BTreeMap<String, PartitionState>,
}

impl StreamState {
    /// Create a new empty stream state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the bookmark for a partition key
    pub fn bookmark(&self, key: &ContextKey) -> Option<&Bookmark> {
        match key {
            ContextKey::Root => Some(&self.root),
            ContextKey::Partition(ctx) => self.partitions.get(&ctx.identity()).map(|p| &p.bookmark),
        }
    }

    /// Get a mutable bookmark for a partition key, creating if needed
    pub fn bookmark_mut(&mut self, key: &ContextKey) -> &mut Bookmark {
        match key {
            ContextKey::Root => &mut self.root,
            ContextKey::Partition(ctx) => {
                &mut self
                    .partitions
                    .entry(ctx.identity())
                    .or_insert_with(|| PartitionState::new(ctx.clone()))
                    .bookmark
            }
        }
    }

    /// Iterate over partition states
    pub fn partitions(&self) -> impl Iterator<Item = &PartitionState> {
        self.partitions.values()
    }

    /// Number of partitions
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

/// Serialized form of [`StreamState`]
#[derive(Serialize, Deserialize)]
struct StreamStateRepr {
    #[serde(flatten)]
    root: Bookmark,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    partitions: Vec<PartitionState>,
}

impl From<StreamStateRepr> for StreamState {
    fn from(repr: StreamStateRepr) -> Self {
        Self {
            root: repr.root,
            partitions: repr
                .partitions
                .into_iter()
                .map(|p| (p.context.identity(), p))
                .collect(),
        }
    }
}

impl From<StreamState> for StreamStateRepr {
    fn from(state: StreamState) -> Self {
        Self {
            root: state.root,
            partitions: state.partitions.into_values().collect(),
        }
    }
}

/// Bookmark of one child-stream partition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionState {
    /// Parent context this partition belongs to
    pub context: Context,
    /// Progress within this partition
    #[serde(flatten)]
    pub bookmark: Bookmark,
}

impl PartitionState {
    /// Create an empty partition state
    pub fn new(context: Context) -> Self {
        Self {
            context,
            bookmark: Bookmark::default(),
        }
    }
}

/// Replication progress of one (stream, context) unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Field used as the cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,

    /// Highest cursor value fully processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key_value: Option<JsonValue>,

    /// Free-form auxiliary fields
    #[serde(default, skip_serializing_if = "JsonObject::is_empty")]
    pub aux: JsonObject,
}

impl Bookmark {
    /// Create an empty bookmark
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bookmark at a value
    pub fn at(replication_key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            replication_key: Some(replication_key.into()),
            replication_key_value: Some(value.into()),
            aux: JsonObject::new(),
        }
    }

    /// Check if nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.replication_key_value.is_none() && self.aux.is_empty()
    }

    /// Current cursor value, ignoring nulls
    pub fn value(&self) -> Option<&JsonValue> {
        self.replication_key_value.as_ref().filter(|v| !v.is_null())
    }

    /// Raise the cursor to `value` if it is higher; returns whether it moved
    ///
    /// Moving the cursor resets the keys tracked at the previous value.
    pub fn advance(&mut self, value: &JsonValue) -> bool {
        if value.is_null() {
            return false;
        }
        let raise = match self.value() {
            None => true,
            Some(current) => compare_values(value, current) == Ordering::Greater,
        };
        if raise {
            self.replication_key_value = Some(value.clone());
            self.aux.remove(KEYS_AT_BOOKMARK);
        }
        raise
    }

    /// Record an emitted record's cursor value and identity
    pub fn observe(&mut self, value: &JsonValue, record_key: &str) {
        self.advance(value);
        if self
            .value()
            .is_some_and(|current| compare_values(value, current) == Ordering::Equal)
        {
            self.add_key_at_bookmark(record_key);
        }
    }

    /// Check whether a record was already processed by an earlier page or run
    pub fn is_synced(&self, value: &JsonValue, record_key: &str) -> bool {
        match self.value() {
            None => false,
            Some(current) => match compare_values(value, current) {
                Ordering::Less => true,
                Ordering::Equal => self.keys_at_bookmark().any(|k| k == record_key),
                Ordering::Greater => false,
            },
        }
    }

    /// Primary keys emitted at exactly the current cursor value
    pub fn keys_at_bookmark(&self) -> impl Iterator<Item = &str> {
        self.aux
            .get(KEYS_AT_BOOKMARK)
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
            .filter_map(JsonValue::as_str)
    }

    fn add_key_at_bookmark(&mut self, record_key: &str) {
        let entry = self
            .aux
            .entry(KEYS_AT_BOOKMARK.to_string())
            .or_insert_with(|| JsonValue::Array(Vec::new()));
        if let JsonValue::Array(keys) = entry {
            if !keys.iter().any(|k| k.as_str() == Some(record_key)) {
                keys.push(JsonValue::String(record_key.to_string()));
            }
        }
    }

    /// Merge another bookmark into this one, never lowering the cursor
    pub fn merge(&mut self, other: &Bookmark) {
        if other.replication_key.is_some() {
            self.replication_key.clone_from(&other.replication_key);
        }

        for (field, value) in &other.aux {
            if field != KEYS_AT_BOOKMARK {
                self.aux.insert(field.clone(), value.clone());
            }
        }

        let Some(incoming) = other.value() else {
            return;
        };
        let ordering = self
            .value()
            .map_or(Ordering::Greater, |current| compare_values(incoming, current));
        match ordering {
            Ordering::Greater => {
                self.replication_key_value = Some(incoming.clone());
                self.aux.remove(KEYS_AT_BOOKMARK);
                for key in other.keys_at_bookmark() {
                    self.add_key_at_bookmark(key);
                }
            }
            Ordering::Equal => {
                for key in other.keys_at_bookmark() {
                    self.add_key_at_bookmark(key);
                }
            }
            Ordering::Less => {}
        }
    }
}

/// Compare two replication key values
///
/// Numbers compare numerically, RFC 3339 timestamps compare as instants
/// (so differing UTC offsets order correctly), anything else compares as text.
pub fn compare_values(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x.cmp(&y)
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                x.cmp(&y)
            } else {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        }
        (JsonValue::String(x), JsonValue::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        _ => value_to_string(a).cmp(&value_to_string(b)),
    }
}
