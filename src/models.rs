/// Data Models Module
///
/// This module defines the core data structures used throughout the application.
/// Extracted catalog data travels as row sets of scalar values; run bookkeeping
/// travels as run records.
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single flattened value from a retailer response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text form used when a value lands in a text column
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Boolean(b) => Some(b.to_string()),
            Self::Text(s) => Some(s.clone()),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One record: column name -> value, in first-seen column order
pub type Row = IndexMap<String, ScalarValue>;

/// The normalized output of one extraction pass for one category
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub name: String,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn new(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self { name: name.into(), rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of all column names across rows, in first-seen order.
    /// Rows missing a column are treated as null for it.
    pub fn columns(&self) -> Vec<String> {
        let mut seen: IndexMap<&str, ()> = IndexMap::new();
        for row in &self.rows {
            for key in row.keys() {
                seen.entry(key.as_str()).or_insert(());
            }
        }
        seen.into_keys().map(str::to_string).collect()
    }

    /// Destination table name for this category
    pub fn table_name(&self) -> String {
        format!("raw_{}Products", self.name)
    }
}

/// Write policy for a load task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LoadMethod {
    #[default]
    Overwrite,
    Upsert,
}

impl LoadMethod {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Overwrite => "overwrite",
            Self::Upsert => "upsert",
        }
    }
}

/// Destination of a load: (schema, table) plus the upsert key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTable {
    pub schema_name: String,
    pub table_name: String,
    pub key_columns: Vec<String>,
}

impl TargetTable {
    pub fn new(schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self { schema_name: schema_name.into(), table_name: table_name.into(), key_columns: Vec::new() }
    }

    pub fn with_keys(mut self, key_columns: Vec<String>) -> Self {
        self.key_columns = key_columns;
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

/// Lifecycle status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Started,
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Started => "Started",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }
}

/// One row of the metadata log
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_timestamp: NaiveDateTime,
    pub run_id: i64,
    pub run_status: RunStatus,
    pub run_config: serde_json::Value,
    pub run_log: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, ScalarValue)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_columns_union_in_first_seen_order() {
        let set = RowSet::new(
            "Bakery",
            vec![
                row(&[("id", 1.into()), ("name", "A".into())]),
                row(&[("id", 2.into()), ("price", 1.5.into()), ("name", "B".into())]),
            ],
        );
        assert_eq!(set.columns(), vec!["id", "name", "price"]);
    }

    #[test]
    fn test_table_name() {
        let set = RowSet::new("FruitVeg", vec![]);
        assert_eq!(set.table_name(), "raw_FruitVegProducts");
    }

    #[test]
    fn test_run_status_strings() {
        assert_eq!(RunStatus::Started.as_str(), "Started");
        assert_eq!(RunStatus::Completed.as_str(), "Completed");
        assert_eq!(RunStatus::Error.as_str(), "Error");
    }

    #[test]
    fn test_scalar_to_text() {
        assert_eq!(ScalarValue::Integer(7).to_text(), Some("7".to_string()));
        assert_eq!(ScalarValue::Boolean(true).to_text(), Some("true".to_string()));
        assert_eq!(ScalarValue::Null.to_text(), None);
    }
}
