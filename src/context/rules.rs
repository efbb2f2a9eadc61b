//! Child-context derivation rules

use super::types::Context;
use crate::error::{Error, Result};
use crate::record::Record;
use std::fmt;
use std::sync::Arc;

/// Derives at most one child context from a normalized parent record
///
/// Returning `None` means no child unit of work runs for the record.
pub trait ContextRule: Send + Sync + fmt::Debug {
    /// Derive the child context for `record` of `stream`
    fn derive(&self, stream: &str, record: &Record) -> Result<Option<Context>>;
}

// ============================================================================
// Field Context
// ============================================================================

/// Unconditional derivation from identifying record fields
///
/// Built as a list of `(context key, record field)` pairs.
#[derive(Debug, Clone, Default)]
pub struct FieldContext {
    mappings: Vec<(String, String)>,
}

impl FieldContext {
    /// Map one record field to a context key
    pub fn new(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self::default().with(key, field)
    }

    /// Map another record field
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.mappings.push((key.into(), field.into()));
        self
    }

    /// Build the context; a missing or null field is a data shape error
    pub fn build(&self, stream: &str, record: &Record) -> Result<Context> {
        let mut context = Context::new();
        for (key, field) in &self.mappings {
            match record.value(field) {
                Some(value) if !value.is_null() => context.insert(key.clone(), value),
                _ => {
                    return Err(Error::data_shape(
                        stream,
                        field,
                        format!("required to derive child context key '{key}'"),
                    ))
                }
            }
        }
        Ok(context)
    }
}

impl ContextRule for FieldContext {
    fn derive(&self, stream: &str, record: &Record) -> Result<Option<Context>> {
        self.build(stream, record).map(Some)
    }
}

// ============================================================================
// Conditional Context
// ============================================================================

/// Predicate over a normalized record
pub type RecordPredicate = Arc<dyn Fn(&str, &Record) -> Result<bool> + Send + Sync>;

/// Derivation that only yields a context when a predicate holds
#[derive(Clone)]
pub struct ConditionalContext {
    context: FieldContext,
    predicate: RecordPredicate,
    description: String,
}

impl ConditionalContext {
    /// Create a conditional rule from a predicate
    pub fn new<F>(context: FieldContext, description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&str, &Record) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            context,
            predicate: Arc::new(predicate),
            description: description.into(),
        }
    }

    /// Derive only when two decimal fields of the record differ
    ///
    /// Both fields must have been coerced by the stream's normalizer.
    pub fn when_decimals_differ(
        current: impl Into<String>,
        original: impl Into<String>,
        context: FieldContext,
    ) -> Self {
        let current = current.into();
        let original = original.into();
        let description = format!("{current} != {original}");

        Self::new(context, description, move |stream, record| {
            let lhs = record.decimal(&current).ok_or_else(|| {
                Error::data_shape(stream, current.as_str(), "expected a normalized decimal")
            })?;
            let rhs = record.decimal(&original).ok_or_else(|| {
                Error::data_shape(stream, original.as_str(), "expected a normalized decimal")
            })?;
            Ok(lhs != rhs)
        })
    }

    /// Human-readable form of the predicate
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for ConditionalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalContext")
            .field("context", &self.context)
            .field("when", &self.description)
            .finish_non_exhaustive()
    }
}

impl ContextRule for ConditionalContext {
    fn derive(&self, stream: &str, record: &Record) -> Result<Option<Context>> {
        if (self.predicate)(stream, record)? {
            self.context.build(stream, record).map(Some)
        } else {
            Ok(None)
        }
    }
}
