/// Parsers Module
///
/// Response parsers for each retailer API. Each parser pulls the category
/// list, the record count and the product records out of raw JSON bodies.
pub mod coles;
pub mod woolworths;

use crate::error::{IngestError, Result};
use serde_json::Value;

/// One browsable product category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    /// Retailer identifier, when the API provides one
    pub id: Option<String>,
    /// URL-friendly name, e.g. `fruit-veg`
    pub slug: String,
    pub description: String,
}

/// Number of pages needed to cover `count` records
pub fn page_count(count: u64, page_size: u64) -> u64 {
    count.div_ceil(page_size.max(1))
}

/// Follow a path of object keys, failing with a parse error naming the missing key
pub(crate) fn lookup<'a>(body: &'a Value, path: &[&str]) -> Result<&'a Value> {
    path.iter().try_fold(body, |current, key| {
        current.get(*key).ok_or_else(|| IngestError::Parse(format!("response is missing `{}`", path.join("."))))
    })
}

pub(crate) fn as_array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    value.as_array().ok_or_else(|| IngestError::Parse(format!("`{}` is not an array", what)))
}

pub(crate) fn as_count(value: &Value, what: &str) -> Result<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
        .ok_or_else(|| IngestError::Parse(format!("`{}` is not a record count: {}", what, value)))
}

/// String form of an identifier that may be sent as a string or a number
pub(crate) fn as_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
