//! Stream dependency graph

use super::types::StreamDescriptor;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Validated forest of stream descriptors
///
/// Immutable once built. Registration order is preserved for roots and for
/// the children of each stream.
#[derive(Debug, Clone)]
pub struct StreamGraph {
    streams: Vec<StreamDescriptor>,
    index: HashMap<String, usize>,
    children: HashMap<String, Vec<usize>>,
}

impl StreamGraph {
    /// Build and validate a graph
    ///
    /// Fails when a name is duplicated, a parent does not resolve, parent
    /// references form a cycle, or a stream with children has no context
    /// rule.
    pub fn new(streams: Vec<StreamDescriptor>) -> Result<Self> {
        let mut index = HashMap::with_capacity(streams.len());
        for (i, stream) in streams.iter().enumerate() {
            if stream.name.is_empty() {
                return Err(Error::graph(format!("stream #{i} has an empty name")));
            }
            if index.insert(stream.name.clone(), i).is_some() {
                return Err(Error::graph(format!(
                    "duplicate stream name '{}'",
                    stream.name
                )));
            }
        }

        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, stream) in streams.iter().enumerate() {
            if let Some(parent) = &stream.parent {
                if !index.contains_key(parent) {
                    return Err(Error::graph(format!(
                        "stream '{}' references unknown parent '{parent}'",
                        stream.name
                    )));
                }
                children.entry(parent.clone()).or_default().push(i);
            }
        }

        for stream in &streams {
            let mut seen = HashSet::new();
            let mut current = stream;
            while let Some(parent) = &current.parent {
                if !seen.insert(current.name.as_str()) {
                    return Err(Error::graph(format!(
                        "parent references of '{}' form a cycle",
                        stream.name
                    )));
                }
                current = &streams[index[parent]];
            }
        }

        for (parent, kids) in &children {
            let stream = &streams[index[parent]];
            if stream.context_rule.is_none() {
                let names: Vec<&str> = kids.iter().map(|&i| streams[i].name.as_str()).collect();
                return Err(Error::graph(format!(
                    "stream '{parent}' has children ({}) but no context rule",
                    names.join(", ")
                )));
            }
        }

        Ok(Self {
            streams,
            index,
            children,
        })
    }

    /// Streams without a parent, in registration order
    pub fn roots(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(|s| s.is_root())
    }

    /// Direct children of a stream, in registration order
    pub fn children_of(&self, name: &str) -> impl Iterator<Item = &StreamDescriptor> {
        self.children
            .get(name)
            .into_iter()
            .flatten()
            .map(|&i| &self.streams[i])
    }

    /// Check if a stream has children
    pub fn has_children(&self, name: &str) -> bool {
        self.children.get(name).is_some_and(|kids| !kids.is_empty())
    }

    /// Look up a stream by name
    pub fn get(&self, name: &str) -> Option<&StreamDescriptor> {
        self.index.get(name).map(|&i| &self.streams[i])
    }

    /// Look up a stream, failing for unknown names
    pub fn require(&self, name: &str) -> Result<&StreamDescriptor> {
        self.get(name).ok_or_else(|| Error::UnknownStream {
            stream: name.to_string(),
        })
    }

    /// All stream names, in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.streams.iter().map(|s| s.name.as_str())
    }

    /// Number of streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Check if the graph has no streams
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Parents before children, depth-first from each root
    pub fn topological_order(&self) -> Vec<&StreamDescriptor> {
        let mut order = Vec::with_capacity(self.streams.len());
        let mut stack: Vec<&StreamDescriptor> = self.roots().collect();
        stack.reverse();

        while let Some(stream) = stack.pop() {
            order.push(stream);
            let mut kids: Vec<&StreamDescriptor> = self.children_of(&stream.name).collect();
            kids.reverse();
            stack.extend(kids);
        }

        order
    }

    /// Ancestors of a stream, nearest first
    pub fn ancestors(&self, name: &str) -> Vec<&StreamDescriptor> {
        let mut out = Vec::new();
        let mut current = self.get(name);
        while let Some(parent) = current.and_then(|s| s.parent.as_deref()).and_then(|p| self.get(p)) {
            out.push(parent);
            current = Some(parent);
        }
        out
    }

    /// Descendants of a stream, depth-first
    pub fn descendants(&self, name: &str) -> Vec<&StreamDescriptor> {
        let mut out = Vec::new();
        let mut stack: Vec<&StreamDescriptor> = self.children_of(name).collect();
        stack.reverse();
        while let Some(stream) = stack.pop() {
            out.push(stream);
            let mut kids: Vec<&StreamDescriptor> = self.children_of(&stream.name).collect();
            kids.reverse();
            stack.extend(kids);
        }
        out
    }
}
