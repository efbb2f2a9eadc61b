//! Record normalizer implementations

use super::types::Record;
use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue};
use rust_decimal::Decimal;
use std::fmt;

/// Per-stream hook applied to every raw record before emission
pub trait RecordNormalizer: Send + Sync + fmt::Debug {
    /// Normalize a raw record of `stream`
    fn normalize(&self, stream: &str, raw: JsonObject) -> Result<Record>;
}

// ============================================================================
// Passthrough
// ============================================================================

/// Normalizer that performs no coercion
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl RecordNormalizer for Passthrough {
    fn normalize(&self, _stream: &str, raw: JsonObject) -> Result<Record> {
        Ok(Record::new(raw))
    }
}

// ============================================================================
// Decimal Fields
// ============================================================================

/// Coerces a fixed set of fields from decimal strings to exact decimals
///
/// Every declared field must be present and parsable; otherwise the record
/// is rejected with [`Error::DataShape`].
#[derive(Debug, Clone, Default)]
pub struct DecimalFields {
    fields: Vec<String>,
}

impl DecimalFields {
    /// Create a normalizer for the given fields
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Declared decimal fields
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl RecordNormalizer for DecimalFields {
    fn normalize(&self, stream: &str, raw: JsonObject) -> Result<Record> {
        let mut record = Record::new(raw);

        for field in &self.fields {
            let value = record
                .get(field)
                .ok_or_else(|| Error::data_shape(stream, field, "field is missing"))?;
            let decimal =
                parse_decimal(value).map_err(|message| Error::data_shape(stream, field, message))?;
            record.set_decimal(field.clone(), decimal);
        }

        Ok(record)
    }
}

/// Parse a JSON string or number into an exact decimal
pub fn parse_decimal(value: &JsonValue) -> std::result::Result<Decimal, String> {
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Null => return Err("value is null".to_string()),
        other => return Err(format!("expected a decimal string, got {other}")),
    };

    // Values that do not fit without rounding are rejected
    let parsed = if text.contains(['e', 'E']) {
        Decimal::from_scientific(&text)
    } else {
        Decimal::from_str_exact(&text)
    };
    parsed.map_err(|e| format!("'{text}' is not an exact decimal: {e}"))
}
