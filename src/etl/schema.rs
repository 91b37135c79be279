/// Schema Module
///
/// Infers a column schema from a row set and coerces row values into the
/// storage types of that schema.
use crate::error::{IngestError, Result};
use crate::models::{Row, RowSet, ScalarValue};
use chrono::{DateTime, NaiveDateTime};
use std::collections::HashMap;

/// Storage type of a destination column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    BigInt,
    Numeric,
    Boolean,
    Timestamp,
    Text,
    Json,
}

impl ColumnType {
    /// Parse a declared type name from configuration
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bigint" | "int8" | "integer" | "int" => Ok(Self::BigInt),
            "numeric" | "decimal" => Ok(Self::Numeric),
            "boolean" | "bool" => Ok(Self::Boolean),
            "timestamp" => Ok(Self::Timestamp),
            "text" | "varchar" | "string" => Ok(Self::Text),
            "jsonb" | "json" => Ok(Self::Json),
            other => Err(IngestError::Schema(format!("unknown column type '{}'", other))),
        }
    }

    /// PostgreSQL type name
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::BigInt => "BIGINT",
            Self::Numeric => "NUMERIC",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
            Self::Text => "TEXT",
            Self::Json => "JSONB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self { name: name.into(), column_type }
    }
}

/// Columns of a destination table plus its uniqueness key
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
    pub key_columns: Vec<String>,
}

impl TableSchema {
    pub fn is_key(&self, name: &str) -> bool {
        self.key_columns.iter().any(|k| k == name)
    }

    pub fn non_key_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(move |c| !self.is_key(&c.name))
    }
}

/// A value ready to be bound to a statement parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlValue {
    Null(ColumnType),
    BigInt(i64),
    Numeric(String),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    Text(String),
    Json(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }
}

/// Parse date/time-stamped text. Accepts RFC 3339 and `YYYY-MM-DD[ T]HH:MM:SS[.fff]`.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Narrowest common storage type for one column's values.
///
/// Nulls never widen a column; an all-null column is text.
pub fn infer_column_type<'a>(values: impl IntoIterator<Item = &'a ScalarValue>) -> ColumnType {
    let (mut ints, mut floats, mut bools, mut texts) = (false, false, false, false);
    let mut all_timestamps = true;

    for value in values {
        match value {
            ScalarValue::Null => {}
            ScalarValue::Integer(_) => ints = true,
            ScalarValue::Float(_) => floats = true,
            ScalarValue::Boolean(_) => bools = true,
            ScalarValue::Text(s) => {
                texts = true;
                if all_timestamps && parse_timestamp(s).is_none() {
                    all_timestamps = false;
                }
            }
        }
    }

    match (ints, floats, bools, texts) {
        (true, false, false, false) => ColumnType::BigInt,
        (_, true, false, false) => ColumnType::Numeric,
        (false, false, true, false) => ColumnType::Boolean,
        (false, false, false, true) if all_timestamps => ColumnType::Timestamp,
        _ => ColumnType::Text,
    }
}

/// Build the table schema for a row set.
///
/// Types are inferred once over the whole row set; declared types take
/// precedence over inference. Key columns must be a subset of the row set's columns.
pub fn infer_schema(
    row_set: &RowSet,
    key_columns: &[String],
    declared: &HashMap<String, ColumnType>,
) -> Result<TableSchema> {
    let names = row_set.columns();

    for key in key_columns {
        if !names.contains(key) {
            return Err(IngestError::Constraint(format!(
                "key column '{}' is not a column of row set '{}'",
                key, row_set.name
            )));
        }
    }

    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        if name.is_empty() {
            return Err(IngestError::Schema(format!("row set '{}' has an unnamed column", row_set.name)));
        }

        let column_type = match declared.get(&name) {
            Some(ty) => *ty,
            None => infer_column_type(row_set.rows.iter().filter_map(|r| r.get(&name))),
        };
        columns.push(ColumnDef { name, column_type });
    }

    Ok(TableSchema { columns, key_columns: key_columns.to_vec() })
}

/// Convert one value into the storage form of its column type
pub fn coerce_value(column: &ColumnDef, value: &ScalarValue) -> Result<SqlValue> {
    let mismatch = || {
        IngestError::Schema(format!(
            "value {:?} cannot be stored in column '{}' of type {}",
            value,
            column.name,
            column.column_type.sql_name()
        ))
    };

    if value.is_null() {
        return Ok(SqlValue::Null(column.column_type));
    }

    let coerced = match (column.column_type, value) {
        (ColumnType::BigInt, ScalarValue::Integer(i)) => SqlValue::BigInt(*i),
        (ColumnType::BigInt, ScalarValue::Float(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            SqlValue::BigInt(*f as i64)
        }
        (ColumnType::BigInt, ScalarValue::Text(s)) => SqlValue::BigInt(s.trim().parse().map_err(|_| mismatch())?),

        (ColumnType::Numeric, ScalarValue::Integer(i)) => SqlValue::Numeric(i.to_string()),
        (ColumnType::Numeric, ScalarValue::Float(f)) if f.is_finite() => SqlValue::Numeric(f.to_string()),
        (ColumnType::Numeric, ScalarValue::Text(s)) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => SqlValue::Numeric(s.trim().to_string()),
            _ => return Err(mismatch()),
        },

        (ColumnType::Boolean, ScalarValue::Boolean(b)) => SqlValue::Boolean(*b),
        (ColumnType::Boolean, ScalarValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => SqlValue::Boolean(true),
            "false" => SqlValue::Boolean(false),
            _ => return Err(mismatch()),
        },

        (ColumnType::Timestamp, ScalarValue::Text(s)) => SqlValue::Timestamp(parse_timestamp(s).ok_or_else(mismatch)?),

        (ColumnType::Text, other) => SqlValue::Text(other.to_text().unwrap_or_default()),

        (ColumnType::Json, ScalarValue::Text(s)) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(_) => SqlValue::Json(s.clone()),
            Err(_) => SqlValue::Json(serde_json::Value::String(s.clone()).to_string()),
        },
        (ColumnType::Json, other) => {
            SqlValue::Json(serde_json::to_string(other).map_err(|e| IngestError::Schema(e.to_string()))?)
        }

        _ => return Err(mismatch()),
    };

    Ok(coerced)
}

/// Convert a row into schema column order; missing columns become nulls
pub fn coerce_row(schema: &TableSchema, row: &Row) -> Result<Vec<SqlValue>> {
    schema
        .columns
        .iter()
        .map(|column| match row.get(&column.name) {
            Some(value) => coerce_value(column, value),
            None => Ok(SqlValue::Null(column.column_type)),
        })
        .collect()
}
