//! Stream and field selection

use super::graph::StreamGraph;
use super::types::StreamDescriptor;
use crate::error::{Error, Result};
use crate::record::Record;
use std::collections::{BTreeSet, HashMap};

/// Which streams (and optionally which fields) a run emits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSelection {
    /// Selected stream names; `None` selects everything
    streams: Option<BTreeSet<String>>,
    /// Per-stream field allow-lists
    fields: HashMap<String, Vec<String>>,
}

impl StreamSelection {
    /// Select every stream
    pub fn all() -> Self {
        Self::default()
    }

    /// Select only the named streams
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            streams: Some(names.into_iter().map(Into::into).collect()),
            fields: HashMap::new(),
        }
    }

    /// Restrict the emitted fields of a stream
    ///
    /// Primary and replication key fields are always kept.
    #[must_use]
    pub fn with_fields<I, S>(mut self, stream: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .insert(stream.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    /// Check every named stream exists in the graph
    pub fn validate(&self, graph: &StreamGraph) -> Result<()> {
        let named = self
            .streams
            .iter()
            .flatten()
            .chain(self.fields.keys());
        for name in named {
            graph.require(name)?;
        }
        Ok(())
    }

    /// Check if a stream's records are emitted
    pub fn is_selected(&self, name: &str) -> bool {
        self.streams
            .as_ref()
            .map_or(true, |streams| streams.contains(name))
    }

    /// Check if a stream must be traversed (selected, or an ancestor of one)
    pub fn is_required(&self, graph: &StreamGraph, name: &str) -> bool {
        self.is_selected(name)
            || graph
                .descendants(name)
                .iter()
                .any(|s| self.is_selected(&s.name))
    }

    /// Selected stream names in traversal order
    pub fn selected_names<'a>(&self, graph: &'a StreamGraph) -> Vec<&'a str> {
        graph
            .topological_order()
            .into_iter()
            .filter(|s| self.is_selected(&s.name))
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Project a record onto the stream's field allow-list
    pub fn project(&self, stream: &StreamDescriptor, record: Record) -> Record {
        let Some(fields) = self.fields.get(&stream.name) else {
            return record;
        };

        let mut allowed: Vec<String> = fields.clone();
        allowed.extend(stream.primary_key.iter().cloned());
        allowed.extend(stream.replication_key.iter().cloned());
        record.project(&allowed)
    }
}

impl std::str::FromStr for StreamSelection {
    type Err = Error;

    /// Parse a comma-separated stream list; empty selects everything
    fn from_str(s: &str) -> Result<Self> {
        let names: Vec<&str> = s
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            Ok(Self::all())
        } else {
            Ok(Self::only(names))
        }
    }
}
