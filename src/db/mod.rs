/// Database Module
///
/// This module handles all PostgreSQL database operations including:
/// - Connection pool management
/// - Schema and table DDL derived from inferred table schemas
/// - Chunked inserts and upserts of catalog rows
pub mod metadata;

#[cfg(test)]
pub mod memory;

use crate::error::Result;
use crate::etl::schema::{ColumnDef, ColumnType, SqlValue, TableSchema};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, query_builder::Separated, PgConnection, PgPool, Postgres, QueryBuilder};

/// PostgreSQL limits a single statement to this many bind parameters
const MAX_BIND_PARAMS: usize = 65_535;

/// Relational target the loader and the metadata logger write through.
///
/// Rows are passed already coerced, in the column order of the given schema.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create the schema if absent. Returns true when it was created.
    async fn create_schema_if_missing(&self, schema: &str) -> Result<bool>;

    /// Drop the table if present, create it from `columns` and insert `rows`, atomically
    async fn replace_table(&self, schema: &str, table: &str, columns: &TableSchema, rows: &[Vec<SqlValue>])
        -> Result<u64>;

    /// Create the table if absent, add any columns it is missing and make the
    /// key columns unique. Returns the table's columns as stored afterwards.
    async fn ensure_table(&self, schema: &str, table: &str, columns: &TableSchema) -> Result<Vec<ColumnDef>>;

    /// Plain insert into an existing table
    async fn append_rows(&self, schema: &str, table: &str, columns: &TableSchema, rows: &[Vec<SqlValue>])
        -> Result<u64>;

    /// Insert, updating every non-key column of rows whose key already exists
    async fn upsert_rows(&self, schema: &str, table: &str, columns: &TableSchema, rows: &[Vec<SqlValue>])
        -> Result<u64>;

    /// Largest value of an integer column, None for an empty table
    async fn max_integer(&self, schema: &str, table: &str, column: &str) -> Result<Option<i64>>;
}

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(database_url).await?;

        Ok(Self { pool })
    }

    /// Test the database connection
    pub async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;

        Ok(())
    }

    /// Columns of an existing table in ordinal order; empty when the table is absent
    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDef>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT column_name::text, data_type::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name, data_type)| ColumnDef::new(name, catalog_column_type(&data_type))).collect())
    }

    /// Whether a unique index or primary key covers exactly `keys`
    async fn has_unique_key(&self, schema: &str, table: &str, keys: &[String]) -> Result<bool> {
        let mut sorted = keys.to_vec();
        sorted.sort();

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                SELECT 1 FROM pg_index i
                JOIN pg_class t ON t.oid = i.indrelid
                JOIN pg_namespace n ON n.oid = t.relnamespace
                WHERE n.nspname = $1 AND t.relname = $2 AND i.indisunique
                  AND (SELECT array_agg(a.attname::text ORDER BY a.attname::text)
                       FROM pg_attribute a
                       WHERE a.attrelid = t.oid AND a.attnum = ANY(i.indkey)) = $3
            )",
        )
        .bind(schema)
        .bind(table)
        .bind(sorted)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}

/// Map an `information_schema.columns.data_type` to the column type values are coerced to
fn catalog_column_type(data_type: &str) -> ColumnType {
    match data_type {
        "bigint" | "integer" | "smallint" => ColumnType::BigInt,
        "numeric" | "double precision" | "real" => ColumnType::Numeric,
        "boolean" => ColumnType::Boolean,
        "timestamp without time zone" | "timestamp with time zone" => ColumnType::Timestamp,
        "jsonb" | "json" => ColumnType::Json,
        _ => ColumnType::Text,
    }
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Fully qualify a table name.
fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Generate DDL for table creation.
fn generate_ddl(schema: &str, table: &str, columns: &TableSchema, if_not_exists: bool) -> String {
    let mut defs: Vec<String> = columns
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_name()))
        .collect();

    if !columns.key_columns.is_empty() {
        let keys: Vec<String> = columns.key_columns.iter().map(|k| quote_ident(k)).collect();
        defs.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }

    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        qualify_table(schema, table),
        defs.join(", ")
    )
}

/// Unique index backing ON CONFLICT on a table created without a key
fn unique_index_ddl(schema: &str, table: &str, keys: &[String]) -> String {
    let quoted: Vec<String> = keys.iter().map(|k| quote_ident(k)).collect();
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&format!("{}_{}_key", table, keys.join("_"))),
        qualify_table(schema, table),
        quoted.join(", ")
    )
}

/// ON CONFLICT clause updating every non-key column from the proposed row
fn upsert_clause(columns: &TableSchema) -> String {
    let keys: Vec<String> = columns.key_columns.iter().map(|k| quote_ident(k)).collect();
    let updates: Vec<String> = columns
        .non_key_columns()
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(&c.name)))
        .collect();

    if updates.is_empty() {
        format!(" ON CONFLICT ({}) DO NOTHING", keys.join(", "))
    } else {
        format!(" ON CONFLICT ({}) DO UPDATE SET {}", keys.join(", "), updates.join(", "))
    }
}

/// Rows that fit in one statement without exceeding the bind parameter limit
fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1)).max(1)
}

fn push_sql_value(b: &mut Separated<'_, '_, Postgres, &'static str>, value: &SqlValue) {
    match value {
        SqlValue::Null(ty) => {
            b.push_bind(None::<String>).push_unseparated(format!("::{}", ty.sql_name()));
        }
        SqlValue::BigInt(v) => {
            b.push_bind(*v);
        }
        SqlValue::Numeric(v) => {
            b.push_bind(v.clone()).push_unseparated("::NUMERIC");
        }
        SqlValue::Boolean(v) => {
            b.push_bind(*v);
        }
        SqlValue::Timestamp(v) => {
            b.push_bind(*v);
        }
        SqlValue::Text(v) => {
            b.push_bind(v.clone());
        }
        SqlValue::Json(v) => {
            b.push_bind(v.clone()).push_unseparated("::JSONB");
        }
    }
}

/// Insert rows with multi-row VALUES statements, splitting on the parameter limit
async fn insert_rows(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
    columns: &TableSchema,
    rows: &[Vec<SqlValue>],
    on_conflict: Option<&str>,
) -> Result<u64> {
    if rows.is_empty() || columns.columns.is_empty() {
        return Ok(0);
    }

    let col_list: Vec<String> = columns.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let mut affected = 0;

    for batch in rows.chunks(rows_per_statement(columns.columns.len())) {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} ({}) ", qualify_table(schema, table), col_list.join(", ")));
        qb.push_values(batch, |mut b, row| {
            for value in row {
                push_sql_value(&mut b, value);
            }
        });
        if let Some(clause) = on_conflict {
            qb.push(clause);
        }

        affected += qb.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(affected)
}

#[async_trait]
impl Warehouse for Database {
    async fn create_schema_if_missing(&self, schema: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            return Ok(false);
        }

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))).execute(&self.pool).await?;
        Ok(true)
    }

    async fn replace_table(
        &self,
        schema: &str,
        table: &str,
        columns: &TableSchema,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", qualify_table(schema, table))).execute(&mut *tx).await?;
        sqlx::query(&generate_ddl(schema, table, columns, false)).execute(&mut *tx).await?;
        let inserted = insert_rows(&mut tx, schema, table, columns, rows, None).await?;

        tx.commit().await?;

        tracing::debug!("Replaced table {}.{} with {} rows", schema, table, inserted);
        Ok(inserted)
    }

    async fn ensure_table(&self, schema: &str, table: &str, columns: &TableSchema) -> Result<Vec<ColumnDef>> {
        let existing = self.table_columns(schema, table).await?;

        if existing.is_empty() {
            sqlx::query(&generate_ddl(schema, table, columns, true)).execute(&self.pool).await?;
            tracing::info!("Created table {}.{}", schema, table);
            return self.table_columns(schema, table).await;
        }

        for column in columns.columns.iter().filter(|c| !existing.iter().any(|e| e.name == c.name)) {
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                qualify_table(schema, table),
                quote_ident(&column.name),
                column.column_type.sql_name()
            ))
            .execute(&self.pool)
            .await?;

            tracing::info!("Added column {} to {}.{}", column.name, schema, table);
        }

        if !columns.key_columns.is_empty() && !self.has_unique_key(schema, table, &columns.key_columns).await? {
            sqlx::query(&unique_index_ddl(schema, table, &columns.key_columns)).execute(&self.pool).await?;
            tracing::info!("Added unique key ({}) to {}.{}", columns.key_columns.join(", "), schema, table);
        }

        self.table_columns(schema, table).await
    }

    async fn append_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &TableSchema,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let inserted = insert_rows(&mut tx, schema, table, columns, rows, None).await?;
        tx.commit().await?;

        Ok(inserted)
    }

    async fn upsert_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &TableSchema,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        let clause = upsert_clause(columns);

        let mut tx = self.pool.begin().await?;
        let affected = insert_rows(&mut tx, schema, table, columns, rows, Some(&clause)).await?;
        tx.commit().await?;

        Ok(affected)
    }

    async fn max_integer(&self, schema: &str, table: &str, column: &str) -> Result<Option<i64>> {
        let max = sqlx::query_scalar::<_, Option<i64>>(&format!(
            "SELECT MAX({}) FROM {}",
            quote_ident(column),
            qualify_table(schema, table)
        ))
        .fetch_one(&self.pool)
        .await?;

        Ok(max)
    }
}
