/// Load Module
///
/// Persists one row set into one table under a write policy:
/// - overwrite: the first chunk replaces the table, later chunks append
/// - upsert: every chunk inserts, updating non-key columns on key conflict
use crate::db::Warehouse;
use crate::error::{IngestError, Result};
use crate::etl::schema::{coerce_row, infer_schema, ColumnDef, ColumnType, SqlValue, TableSchema};
use crate::models::{LoadMethod, RowSet, TargetTable};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Outcome of one table write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub table: String,
    pub rows_written: usize,
    pub chunks: usize,
}

/// One row set bound to its destination table
#[derive(Debug, Clone)]
pub struct LoadTask {
    pub row_set: RowSet,
    pub target: TargetTable,
    pub method: LoadMethod,
    pub chunk_size: i64,
    /// Declared column types; inferred for any column not listed
    pub column_types: HashMap<String, ColumnType>,
}

impl LoadTask {
    /// Create the schema if needed, then write the row set
    pub async fn run(&self, warehouse: &dyn Warehouse) -> Result<LoadSummary> {
        ensure_schema(warehouse, &self.target.schema_name).await?;
        write(warehouse, &self.row_set, &self.target, self.method, self.chunk_size, &self.column_types).await
    }
}

/// Idempotently create the destination schema
pub async fn ensure_schema(warehouse: &dyn Warehouse, schema_name: &str) -> Result<()> {
    if warehouse.create_schema_if_missing(schema_name).await? {
        tracing::info!("Schema [{}] created", schema_name);
    } else {
        tracing::info!("Schema [{}] already exists", schema_name);
    }
    Ok(())
}

/// Contiguous `[lower, upper)` slices covering `total` rows.
///
/// A chunk size of zero or less yields a single slice.
pub fn chunk_bounds(total: usize, chunk_size: i64) -> Vec<(usize, usize)> {
    if total == 0 {
        return Vec::new();
    }
    if chunk_size <= 0 {
        return vec![(0, total)];
    }

    let size = chunk_size as usize;
    (0..total).step_by(size).map(|lower| (lower, (lower + size).min(total))).collect()
}

/// Write a row set to `target` under `method`
pub async fn write(
    warehouse: &dyn Warehouse,
    rows: &RowSet,
    target: &TargetTable,
    method: LoadMethod,
    chunk_size: i64,
    column_types: &HashMap<String, ColumnType>,
) -> Result<LoadSummary> {
    tracing::info!("Writing to table: {} ({} rows, {})", target.qualified_name(), rows.len(), method.as_str());

    let summary = match method {
        LoadMethod::Overwrite => overwrite(warehouse, rows, target, chunk_size, column_types).await?,
        LoadMethod::Upsert => upsert(warehouse, rows, target, chunk_size, column_types).await?,
    };

    tracing::info!(
        "Successful write to table: {}, rows inserted/updated: {}",
        target.qualified_name(),
        summary.rows_written
    );
    Ok(summary)
}

fn coerce_all(schema: &TableSchema, rows: &RowSet) -> Result<Vec<Vec<SqlValue>>> {
    rows.rows.iter().map(|row| coerce_row(schema, row)).collect()
}

async fn overwrite(
    warehouse: &dyn Warehouse,
    rows: &RowSet,
    target: &TargetTable,
    chunk_size: i64,
    column_types: &HashMap<String, ColumnType>,
) -> Result<LoadSummary> {
    let mut summary = LoadSummary { table: target.qualified_name(), ..Default::default() };

    if rows.is_empty() {
        tracing::info!("Row set {} is empty, leaving {} untouched", rows.name, summary.table);
        return Ok(summary);
    }

    // One schema for every chunk
    let schema = infer_schema(rows, &[], column_types)?;
    let values = coerce_all(&schema, rows)?;
    let total = values.len();

    for (index, (lower, upper)) in chunk_bounds(total, chunk_size).into_iter().enumerate() {
        let chunk = &values[lower..upper];
        if index == 0 {
            warehouse.replace_table(&target.schema_name, &target.table_name, &schema, chunk).await?;
        } else {
            warehouse.append_rows(&target.schema_name, &target.table_name, &schema, chunk).await?;
        }

        summary.rows_written += chunk.len();
        summary.chunks += 1;
        tracing::info!("Inserted chunk: {} [{}:{}] out of index {}", chunk.len(), lower, upper, total);
    }

    Ok(summary)
}

/// Collapse rows sharing a key; the last occurrence wins, keeping the first position
fn dedupe_by_key(schema: &TableSchema, values: Vec<Vec<SqlValue>>) -> Result<Vec<Vec<SqlValue>>> {
    let key_idx: Vec<usize> = schema
        .key_columns
        .iter()
        .filter_map(|k| schema.columns.iter().position(|c| &c.name == k))
        .collect();

    let mut unique: IndexMap<Vec<SqlValue>, Vec<SqlValue>> = IndexMap::with_capacity(values.len());
    for (row_number, row) in values.into_iter().enumerate() {
        let key: Vec<SqlValue> = key_idx.iter().map(|&i| row[i].clone()).collect();
        if let Some(i) = key.iter().position(SqlValue::is_null) {
            return Err(IngestError::Constraint(format!(
                "row {} has a null value in key column '{}'",
                row_number, schema.key_columns[i]
            )));
        }
        unique.insert(key, row);
    }

    Ok(unique.into_values().collect())
}

/// Replace inferred column types with the types the table already stores.
///
/// Values are then coerced to the stored type; one that does not fit is a schema error.
fn adopt_stored_types(mut schema: TableSchema, stored: &[ColumnDef]) -> TableSchema {
    for column in schema.columns.iter_mut() {
        if let Some(existing) = stored.iter().find(|c| c.name == column.name) {
            if existing.column_type != column.column_type {
                tracing::debug!(
                    "Column {} inferred as {}, table stores {}",
                    column.name,
                    column.column_type.sql_name(),
                    existing.column_type.sql_name()
                );
                column.column_type = existing.column_type;
            }
        }
    }
    schema
}

async fn upsert(
    warehouse: &dyn Warehouse,
    rows: &RowSet,
    target: &TargetTable,
    chunk_size: i64,
    column_types: &HashMap<String, ColumnType>,
) -> Result<LoadSummary> {
    if target.key_columns.is_empty() {
        return Err(IngestError::Constraint(format!(
            "upsert into {} requires key columns",
            target.qualified_name()
        )));
    }

    let mut summary = LoadSummary { table: target.qualified_name(), ..Default::default() };

    if rows.is_empty() {
        tracing::info!("Row set {} is empty, nothing to upsert", rows.name);
        return Ok(summary);
    }

    let inferred = infer_schema(rows, &target.key_columns, column_types)?;

    tracing::info!("Generating table schema: {}", target.table_name);
    let stored = warehouse.ensure_table(&target.schema_name, &target.table_name, &inferred).await?;
    let schema = adopt_stored_types(inferred, &stored);

    let values = dedupe_by_key(&schema, coerce_all(&schema, rows)?)?;
    let total = values.len();
    if total < rows.len() {
        tracing::warn!("Dropped {} rows with duplicate keys from {}", rows.len() - total, rows.name);
    }

    for (lower, upper) in chunk_bounds(total, chunk_size) {
        let chunk = &values[lower..upper];
        warehouse.upsert_rows(&target.schema_name, &target.table_name, &schema, chunk).await?;

        summary.rows_written += chunk.len();
        summary.chunks += 1;
        tracing::info!("Upserted chunk: {} [{}:{}] out of index {}", chunk.len(), lower, upper, total);
    }

    Ok(summary)
}
