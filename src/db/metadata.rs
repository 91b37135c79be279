/// Metadata Logging Module
///
/// Append-only audit trail of pipeline runs. Every run writes one `Started`
/// row and exactly one terminal `Completed` or `Error` row under the same run id.
use super::Warehouse;
use crate::error::Result;
use crate::etl::schema::{coerce_row, ColumnDef, ColumnType, TableSchema};
use crate::models::{Row, RunRecord, ScalarValue};

/// Layout of the metadata log table
fn log_table_schema() -> TableSchema {
    TableSchema {
        columns: vec![
            ColumnDef::new("run_timestamp", ColumnType::Timestamp),
            ColumnDef::new("run_id", ColumnType::BigInt),
            ColumnDef::new("run_status", ColumnType::Text),
            ColumnDef::new("run_config", ColumnType::Json),
            ColumnDef::new("run_log", ColumnType::Text),
        ],
        key_columns: vec!["run_timestamp".to_string(), "run_id".to_string(), "run_status".to_string()],
    }
}

pub struct MetadataLogger<'a> {
    warehouse: &'a dyn Warehouse,
    schema_name: String,
    table_name: String,
}

impl<'a> MetadataLogger<'a> {
    pub fn new(warehouse: &'a dyn Warehouse, schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self { warehouse, schema_name: schema_name.into(), table_name: table_name.into() }
    }

    async fn ensure_log_table(&self) -> Result<TableSchema> {
        let schema = log_table_schema();
        self.warehouse.create_schema_if_missing(&self.schema_name).await?;
        self.warehouse.ensure_table(&self.schema_name, &self.table_name, &schema).await?;
        Ok(schema)
    }

    /// 1 for an empty log, otherwise the largest recorded run id plus one.
    ///
    /// Not atomic: concurrent pipelines may receive the same id.
    pub async fn next_run_id(&self) -> Result<i64> {
        self.ensure_log_table().await?;
        let latest = self.warehouse.max_integer(&self.schema_name, &self.table_name, "run_id").await?;

        Ok(latest.map_or(1, |id| id + 1))
    }

    /// Append one run record. Failures propagate; there is no fallback sink.
    pub async fn record(&self, record: &RunRecord) -> Result<()> {
        let schema = self.ensure_log_table().await?;

        let mut row = Row::new();
        row.insert(
            "run_timestamp".to_string(),
            ScalarValue::Text(record.run_timestamp.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
        );
        row.insert("run_id".to_string(), ScalarValue::Integer(record.run_id));
        row.insert("run_status".to_string(), ScalarValue::from(record.run_status.as_str()));
        row.insert("run_config".to_string(), ScalarValue::Text(record.run_config.to_string()));
        row.insert("run_log".to_string(), ScalarValue::Text(record.run_log.clone()));

        let values = coerce_row(&schema, &row)?;
        self.warehouse.append_rows(&self.schema_name, &self.table_name, &schema, &[values]).await?;

        tracing::debug!("Recorded run {} as {}", record.run_id, record.run_status.as_str());
        Ok(())
    }
}
