//! Record extraction from parsed response bodies

use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue};
use jsonpath_rust::JsonPath;

/// Extracts the record array from a response body
///
/// The path is either a top-level key (`orders`), a dotted path
/// (`data.items`, `$.data.items`) or a JSONPath with wildcards
/// (`$.data[*].node`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordExtractor {
    /// Path to the records; `None` means the body itself
    path: Option<String>,
}

impl RecordExtractor {
    /// Create an extractor for a record path
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Create an extractor treating the whole body as the records
    pub fn root() -> Self {
        Self::default()
    }

    /// The configured record path
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Extract records as JSON objects
    ///
    /// A missing path yields no records. Elements that are not objects are
    /// rejected.
    pub fn extract(&self, body: &JsonValue) -> Result<Vec<JsonObject>> {
        let values = match &self.path {
            Some(path) if path.contains('*') => extract_with_jsonpath(body, path)?,
            Some(path) => match extract_simple_path(body, path) {
                Some(JsonValue::Array(arr)) => arr,
                Some(JsonValue::Null) | None => Vec::new(),
                Some(v) => vec![v],
            },
            None => match body {
                JsonValue::Array(arr) => arr.clone(),
                JsonValue::Null => Vec::new(),
                other => vec![other.clone()],
            },
        };

        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| match value {
                JsonValue::Object(obj) => Ok(obj),
                other => Err(Error::RecordExtraction {
                    path: self.path.clone().unwrap_or_else(|| "$".to_string()),
                    message: format!("element {i} is not an object: {other}"),
                }),
            })
            .collect()
    }
}

/// Walk a dotted path with optional array indices
fn extract_simple_path(value: &JsonValue, path: &str) -> Option<JsonValue> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() || path == "$" {
        return Some(value.clone());
    }

    let mut current = value;
    for part in path.split('.') {
        // Array indexing like "data[0]" or "items[-1]"
        if let Some(bracket_pos) = part.find('[') {
            let name = &part[..bracket_pos];
            let index_str = part[bracket_pos + 1..].trim_end_matches(']');

            if !name.is_empty() {
                current = current.get(name)?;
            }

            let index = index_str.parse::<i64>().ok()?;
            let JsonValue::Array(arr) = current else {
                return None;
            };
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_possible_wrap
            )]
            let idx = if index < 0 {
                usize::try_from(arr.len() as i64 + index).ok()?
            } else {
                index as usize
            };
            current = arr.get(idx)?;
        } else {
            current = current.get(part)?;
        }
    }

    Some(current.clone())
}

fn extract_with_jsonpath(value: &JsonValue, path: &str) -> Result<Vec<JsonValue>> {
    let jp = JsonPath::try_from(path)
        .map_err(|e| Error::json_path(format!("Invalid JSONPath '{path}': {e}")))?;

    match jp.find(value) {
        JsonValue::Array(arr) => Ok(arr),
        JsonValue::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}
