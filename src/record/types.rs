//! Normalized record type

use crate::template::value_to_string;
use crate::types::{JsonObject, JsonValue};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// A record after normalization
///
/// Fields coerced by the normalizer live in `decimals` as exact
/// [`Decimal`] values; every other field passes through untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: JsonObject,
    decimals: BTreeMap<String, Decimal>,
}

impl Record {
    /// Wrap a raw JSON object without any coercion
    pub fn new(fields: JsonObject) -> Self {
        Self {
            fields,
            decimals: BTreeMap::new(),
        }
    }

    /// Build a record from any JSON value
    ///
    /// Non-object values are stored under a single `value` field.
    pub fn from_value(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => Self::new(map),
            other => {
                let mut map = JsonObject::new();
                map.insert("value".to_string(), other);
                Self::new(map)
            }
        }
    }

    /// Get a passthrough field
    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    /// Get a coerced decimal field
    pub fn decimal(&self, field: &str) -> Option<Decimal> {
        self.decimals.get(field).copied()
    }

    /// Store a coerced decimal, replacing the raw field
    pub fn set_decimal(&mut self, field: impl Into<String>, value: Decimal) {
        let field = field.into();
        self.fields.remove(&field);
        self.decimals.insert(field, value);
    }

    /// Check whether a field is present (raw or coerced)
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field) || self.decimals.contains_key(field)
    }

    /// Get any field as JSON; decimals render as exact strings
    pub fn value(&self, field: &str) -> Option<JsonValue> {
        if let Some(decimal) = self.decimals.get(field) {
            return Some(JsonValue::String(decimal.to_string()));
        }
        self.fields.get(field).cloned()
    }

    /// Identity of the record built from its primary key values
    pub fn key(&self, primary_key: &[String]) -> String {
        primary_key
            .iter()
            .map(|field| match self.value(field) {
                Some(value) => value_to_string(&value),
                None => "null".to_string(),
            })
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Keep only the given fields
    #[must_use]
    pub fn project(&self, allowed: &[String]) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .filter(|(k, _)| allowed.iter().any(|a| a == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            decimals: self
                .decimals
                .iter()
                .filter(|(k, _)| allowed.iter().any(|a| a == *k))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len() + self.decimals.len()
    }

    /// Check if the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.decimals.is_empty()
    }

    /// Serialize to a JSON object
    pub fn to_json(&self) -> JsonValue {
        let mut map = self.fields.clone();
        for (field, decimal) in &self.decimals {
            map.insert(field.clone(), JsonValue::String(decimal.to_string()));
        }
        JsonValue::Object(map)
    }
}

impl From<JsonObject> for Record {
    fn from(fields: JsonObject) -> Self {
        Self::new(fields)
    }
}
