/// Pipeline Module
///
/// Orchestrates one run: Extract → Load, bracketed by metadata records.
/// A `Started` record is written before any work; exactly one `Completed`
/// or `Error` record follows under the same run id.
pub mod graph;

use crate::config::Config;
use crate::db::metadata::MetadataLogger;
use crate::db::Warehouse;
use crate::error::{IngestError, Result};
use crate::etl::extract::Extractor;
use crate::etl::load::LoadTask;
use crate::logging::RunLog;
use crate::models::{RowSet, RunRecord, RunStatus, TargetTable};
use chrono::Utc;
use graph::TaskGraph;
use std::time::{Duration, Instant};

/// Pipeline execution statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub tables_extracted: usize,
    pub products_extracted: u64,
    pub tables_loaded: usize,
    pub rows_written: usize,
    pub chunks_written: usize,
    pub elapsed_time: Duration,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.rows_written as f64 / secs
        }
    }
}

/// How a run ended
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: i64,
    pub status: RunStatus,
    pub stats: PipelineStats,
    /// The failure recorded with an `Error` status
    pub error: Option<IngestError>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Main ETL Pipeline
pub struct Pipeline<'a> {
    warehouse: &'a dyn Warehouse,
    extractor: Box<dyn Extractor>,
    config: Config,
    run_log: RunLog,
}

impl<'a> Pipeline<'a> {
    pub fn new(warehouse: &'a dyn Warehouse, extractor: Box<dyn Extractor>, config: Config, run_log: RunLog) -> Self {
        Self { warehouse, extractor, config, run_log }
    }

    /// Run the pipeline once.
    ///
    /// Errors returned here are bookkeeping failures: the run id could not be
    /// computed or a metadata record could not be written. Failures inside the
    /// run are recorded and reported through the outcome.
    pub async fn run(mut self) -> Result<RunOutcome> {
        let start_time = Instant::now();
        let logger = MetadataLogger::new(self.warehouse, &self.config.extract.schema_name, &self.config.meta.log_table);

        let run_id = logger.next_run_id().await?;
        tracing::info!("Starting run {} for {}", run_id, self.config.retailer.as_str());
        logger.record(&self.run_record(run_id, RunStatus::Started)).await?;

        let mut stats = PipelineStats::new();
        let result = self.execute(&mut stats).await;
        stats.elapsed_time = start_time.elapsed();

        let (status, error) = match result {
            Ok(()) => {
                tracing::info!("Run {} completed in {:.2}s", run_id, stats.elapsed_time.as_secs_f64());
                (RunStatus::Completed, None)
            }
            Err(e) => {
                tracing::error!("Run {} failed: {}", run_id, e);
                (RunStatus::Error, Some(e))
            }
        };

        logger.record(&self.run_record(run_id, status)).await?;

        Ok(RunOutcome { run_id, status, stats, error })
    }

    fn run_record(&self, run_id: i64, status: RunStatus) -> RunRecord {
        RunRecord {
            run_timestamp: Utc::now().naive_utc(),
            run_id,
            run_status: status,
            run_config: self.config.snapshot(),
            run_log: self.run_log.contents(),
        }
    }

    async fn execute(&mut self, stats: &mut PipelineStats) -> Result<()> {
        tracing::info!("Running extract");
        let row_sets = self.extractor.run().await?;
        stats.tables_extracted = row_sets.len();
        stats.products_extracted = self.extractor.stats().products;

        let tasks = self.build_tasks(row_sets)?;
        if tasks.is_empty() {
            tracing::warn!("No products extracted, nothing to load");
        } else {
            tracing::info!("Running {} load tasks", tasks.len());
        }

        for (name, task) in tasks.into_sorted()? {
            tracing::info!("Loading {} rows into [{}]", task.row_set.len(), name);
            let summary = task.run(self.warehouse).await?;

            stats.tables_loaded += 1;
            stats.rows_written += summary.rows_written;
            stats.chunks_written += summary.chunks;
        }

        Ok(())
    }

    /// One load task per row set. Tasks are independent, so the graph has no edges.
    fn build_tasks(&self, row_sets: Vec<RowSet>) -> Result<TaskGraph<LoadTask>> {
        let mut graph = TaskGraph::new();

        for row_set in row_sets {
            let table_name = row_set.table_name();
            let target = TargetTable::new(&self.config.extract.schema_name, &table_name)
                .with_keys(self.config.key_columns_for(&table_name));
            let column_types = self.config.column_types_for(&table_name)?;

            let task = LoadTask {
                row_set,
                target,
                method: self.config.load.load_method,
                chunk_size: self.config.load.chunk_size,
                column_types,
            };
            graph.add_task(table_name, task)?;
        }

        Ok(graph)
    }
}

/// Print final statistics
pub fn print_final_stats(outcome: &RunOutcome) {
    let stats = &outcome.stats;
    println!("\n📊 Pipeline Statistics:");
    println!("   🆔 Run id: {}", outcome.run_id);
    println!("   📌 Status: {}", outcome.status.as_str());
    println!("   ⏱️  Total time: {:.2}s", stats.elapsed_time.as_secs_f64());
    println!(
        "   🗂️  Tables extracted: {} ({} products)",
        stats.tables_extracted,
        format_number(stats.products_extracted)
    );
    println!("   💾 Tables loaded: {}", stats.tables_loaded);
    println!("   📝 Rows written: {} in {} chunks", format_number(stats.rows_written as u64), stats.chunks_written);
    println!("   ⚡ Throughput: {:.0} rows/sec", stats.rows_per_second());

    if let Some(error) = &outcome.error {
        println!("\n❌ Error: {}", error);
    }
}

/// Format a number with thousand separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}
