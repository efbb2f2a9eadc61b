//! Context types

use crate::types::JsonValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Values derived from one parent record for a child stream
///
/// Keys are kept sorted so the serialized form doubles as a stable identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<String, JsonValue>);

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Check if the context has no values
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over key-value pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    /// Canonical string identity (compact JSON with sorted keys)
    pub fn identity(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

impl<K: Into<String>, V: Into<JsonValue>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Identity of a bookmark partition
///
/// Root streams keep a single bookmark; child streams keep one per parent
/// context so unrelated parents never share progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextKey {
    /// The singleton partition of a stream without a parent
    Root,
    /// The partition of a child stream for one parent context
    Partition(Context),
}

impl ContextKey {
    /// Key for a unit of work of a stream
    pub fn for_stream(has_parent: bool, context: &Context) -> Self {
        if has_parent {
            Self::Partition(context.clone())
        } else {
            Self::Root
        }
    }

    /// The context of a partition key
    pub fn context(&self) -> Option<&Context> {
        match self {
            Self::Root => None,
            Self::Partition(ctx) => Some(ctx),
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("{}"),
            Self::Partition(ctx) => write!(f, "{ctx}"),
        }
    }
}
