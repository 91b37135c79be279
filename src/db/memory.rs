/// In-memory warehouse used by tests.
///
/// Mirrors the PostgreSQL semantics the loader relies on: replace drops and
/// recreates, append inserts, upsert updates non-key columns on key conflict.
/// Values are type checked against the stored columns, and a write fails as a
/// whole.
use super::Warehouse;
use crate::error::{IngestError, Result};
use crate::etl::schema::{ColumnDef, ColumnType, SqlValue, TableSchema};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Type a value is bound as
fn bound_type(value: &SqlValue) -> ColumnType {
    match value {
        SqlValue::Null(ty) => *ty,
        SqlValue::BigInt(_) => ColumnType::BigInt,
        SqlValue::Numeric(_) => ColumnType::Numeric,
        SqlValue::Boolean(_) => ColumnType::Boolean,
        SqlValue::Timestamp(_) => ColumnType::Timestamp,
        SqlValue::Text(_) => ColumnType::Text,
        SqlValue::Json(_) => ColumnType::Json,
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<ColumnDef>,
    pub key_columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl MemoryTable {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Value of `column` in every row, in insertion order
    pub fn column_values(&self, column: &str) -> Vec<SqlValue> {
        match self.index_of(column) {
            Some(i) => self.rows.iter().map(|r| r[i].clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Reorder an incoming row into table column order; columns absent from the incoming schema are null
    fn align(&self, columns: &TableSchema, row: &[SqlValue]) -> Result<Vec<SqlValue>> {
        if let Some(unknown) = columns.columns.iter().find(|c| self.index_of(&c.name).is_none()) {
            return Err(IngestError::Query(format!("column \"{}\" does not exist", unknown.name)));
        }

        self.columns
            .iter()
            .map(|c| match columns.columns.iter().position(|i| i.name == c.name) {
                Some(i) if bound_type(&row[i]) != c.column_type => Err(IngestError::Query(format!(
                    "column \"{}\" is of type {} but expression is of type {}",
                    c.name,
                    c.column_type.sql_name(),
                    bound_type(&row[i]).sql_name()
                ))),
                Some(i) => Ok(row[i].clone()),
                None => Ok(SqlValue::Null(c.column_type)),
            })
            .collect()
    }

    fn align_all(&self, columns: &TableSchema, rows: &[Vec<SqlValue>]) -> Result<Vec<Vec<SqlValue>>> {
        rows.iter().map(|row| self.align(columns, row)).collect()
    }
}

#[derive(Debug, Default)]
struct State {
    schemas: HashSet<String>,
    tables: HashMap<(String, String), MemoryTable>,
    statements: usize,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
    unreachable: bool,
    /// Fail every write to tables with this name
    failing_table: Option<String>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// A warehouse whose every call fails with a connection error
    pub fn unreachable() -> Self {
        Self { unreachable: true, ..Self::default() }
    }

    pub fn failing_on(table: &str) -> Self {
        Self { failing_table: Some(table.to_string()), ..Self::default() }
    }

    pub fn table(&self, schema: &str, table: &str) -> Option<MemoryTable> {
        self.lock().tables.get(&(schema.to_string(), table.to_string())).cloned()
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.lock().schemas.contains(schema)
    }

    /// Number of write calls served, one per chunk
    pub fn write_calls(&self) -> usize {
        self.lock().statements
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, table: Option<&str>) -> Result<()> {
        if self.unreachable {
            return Err(IngestError::Connection("connection refused".to_string()));
        }
        if let (Some(failing), Some(table)) = (&self.failing_table, table) {
            if failing == table {
                return Err(IngestError::Query(format!("relation \"{}\" is locked", table)));
            }
        }
        Ok(())
    }
}

fn key(schema: &str, table: &str) -> (String, String) {
    (schema.to_string(), table.to_string())
}

fn missing_relation(schema: &str, table: &str) -> IngestError {
    IngestError::Query(format!("relation \"{}.{}\" does not exist", schema, table))
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn create_schema_if_missing(&self, schema: &str) -> Result<bool> {
        self.check(None)?;
        Ok(self.lock().schemas.insert(schema.to_string()))
    }

    async fn replace_table(
        &self,
        schema: &str,
        table: &str,
        columns: &TableSchema,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        self.check(Some(table))?;
        let mut state = self.lock();
        state.statements += 1;

        let mut replacement = MemoryTable {
            columns: columns.columns.clone(),
            key_columns: columns.key_columns.clone(),
            rows: Vec::new(),
        };
        replacement.rows = replacement.align_all(columns, rows)?;
        state.tables.insert(key(schema, table), replacement);

        Ok(rows.len() as u64)
    }

    async fn ensure_table(&self, schema: &str, table: &str, columns: &TableSchema) -> Result<Vec<ColumnDef>> {
        self.check(Some(table))?;
        let mut state = self.lock();
        let entry = state.tables.entry(key(schema, table)).or_default();

        for column in &columns.columns {
            if entry.index_of(&column.name).is_none() {
                entry.columns.push(column.clone());
                for row in entry.rows.iter_mut() {
                    row.push(SqlValue::Null(column.column_type));
                }
            }
        }

        // Adopting a key fails like a unique index build would on duplicate stored keys
        if !columns.key_columns.is_empty() && entry.key_columns != columns.key_columns {
            let key_idx: Vec<usize> = columns.key_columns.iter().filter_map(|k| entry.index_of(k)).collect();
            let mut seen = HashSet::new();
            for row in &entry.rows {
                let stored: Vec<SqlValue> = key_idx.iter().map(|&i| row[i].clone()).collect();
                if stored.iter().any(SqlValue::is_null) {
                    continue;
                }
                if !seen.insert(stored) {
                    return Err(IngestError::Constraint(format!(
                        "could not create unique index on {}.{} ({}): duplicate key",
                        schema,
                        table,
                        columns.key_columns.join(", ")
                    )));
                }
            }
            entry.key_columns = columns.key_columns.clone();
        }

        Ok(entry.columns.clone())
    }

    async fn append_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &TableSchema,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        self.check(Some(table))?;
        let mut state = self.lock();
        state.statements += 1;
        let target = state.tables.get_mut(&key(schema, table)).ok_or_else(|| missing_relation(schema, table))?;

        let aligned = target.align_all(columns, rows)?;
        target.rows.extend(aligned);
        Ok(rows.len() as u64)
    }

    async fn upsert_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &TableSchema,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        self.check(Some(table))?;
        let mut state = self.lock();
        state.statements += 1;
        let target = state.tables.get_mut(&key(schema, table)).ok_or_else(|| missing_relation(schema, table))?;

        let key_idx: Vec<usize> = target.key_columns.iter().filter_map(|k| target.index_of(k)).collect();
        if key_idx.is_empty() {
            return Err(IngestError::Query(format!(
                "no unique constraint on {}.{} matching the ON CONFLICT specification",
                schema, table
            )));
        }

        let updatable: Vec<usize> = target
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !target.key_columns.contains(&c.name) && columns.columns.iter().any(|d| d.name == c.name))
            .map(|(i, _)| i)
            .collect();

        let aligned = target.align_all(columns, rows)?;
        if aligned.iter().any(|row| key_idx.iter().any(|&i| row[i].is_null())) {
            return Err(IngestError::Constraint(format!("null key value in {}.{}", schema, table)));
        }

        for row in aligned {
            match target.rows.iter_mut().find(|r| key_idx.iter().all(|&i| r[i] == row[i])) {
                Some(current) => {
                    for &i in &updatable {
                        current[i] = row[i].clone();
                    }
                }
                None => target.rows.push(row),
            }
        }
        Ok(rows.len() as u64)
    }

    async fn max_integer(&self, schema: &str, table: &str, column: &str) -> Result<Option<i64>> {
        self.check(Some(table))?;
        let state = self.lock();
        let target = state.tables.get(&key(schema, table)).ok_or_else(|| missing_relation(schema, table))?;

        Ok(target
            .column_values(column)
            .iter()
            .filter_map(|v| match v {
                SqlValue::BigInt(i) => Some(*i),
                _ => None,
            })
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_table(keys: &[&str]) -> TableSchema {
        TableSchema {
            columns: vec![ColumnDef::new("id", ColumnType::BigInt), ColumnDef::new("price", ColumnType::BigInt)],
            key_columns: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_write_of_mismatched_type_fails_whole_statement() {
        let warehouse = MemoryWarehouse::new();
        let schema = price_table(&[]);
        warehouse
            .replace_table("s", "t", &schema, &[vec![SqlValue::BigInt(1), SqlValue::BigInt(3)]])
            .await
            .unwrap();

        let numeric = TableSchema {
            columns: vec![ColumnDef::new("id", ColumnType::BigInt), ColumnDef::new("price", ColumnType::Numeric)],
            key_columns: Vec::new(),
        };
        let rows = vec![
            vec![SqlValue::BigInt(2), SqlValue::Null(ColumnType::Numeric)],
            vec![SqlValue::BigInt(3), SqlValue::Numeric("2.5".to_string())],
        ];
        let err = warehouse.append_rows("s", "t", &numeric, &rows).await.unwrap_err();

        assert!(matches!(err, IngestError::Query(message) if message.contains("\"price\" is of type BIGINT")));
        assert_eq!(warehouse.table("s", "t").unwrap().rows.len(), 1);
    }

    #[tokio::test]
    async fn test_write_to_unknown_column_fails() {
        let warehouse = MemoryWarehouse::new();
        warehouse.replace_table("s", "t", &price_table(&[]), &[]).await.unwrap();

        let extra = TableSchema { columns: vec![ColumnDef::new("name", ColumnType::Text)], key_columns: Vec::new() };
        let err = warehouse.append_rows("s", "t", &extra, &[vec![SqlValue::Text("A".to_string())]]).await.unwrap_err();

        assert!(matches!(err, IngestError::Query(message) if message.contains("\"name\" does not exist")));
    }

    #[tokio::test]
    async fn test_ensure_table_adopts_key_on_keyless_table() {
        let warehouse = MemoryWarehouse::new();
        let rows = vec![vec![SqlValue::BigInt(1), SqlValue::BigInt(3)], vec![SqlValue::BigInt(2), SqlValue::BigInt(4)]];
        warehouse.replace_table("s", "t", &price_table(&[]), &rows).await.unwrap();

        let columns = warehouse.ensure_table("s", "t", &price_table(&["id"])).await.unwrap();

        assert_eq!(columns, price_table(&[]).columns);
        assert_eq!(warehouse.table("s", "t").unwrap().key_columns, vec!["id"]);
    }

    #[tokio::test]
    async fn test_ensure_table_rejects_key_with_duplicate_stored_values() {
        let warehouse = MemoryWarehouse::new();
        let rows = vec![vec![SqlValue::BigInt(1), SqlValue::BigInt(3)], vec![SqlValue::BigInt(1), SqlValue::BigInt(4)]];
        warehouse.replace_table("s", "t", &price_table(&[]), &rows).await.unwrap();

        let err = warehouse.ensure_table("s", "t", &price_table(&["id"])).await.unwrap_err();

        assert!(matches!(err, IngestError::Constraint(_)));
        assert!(warehouse.table("s", "t").unwrap().key_columns.is_empty());
    }
}
