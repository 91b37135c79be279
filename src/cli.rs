/// CLI Module
///
/// Command-line interface configuration using clap.
use crate::config::{Config, FetchPolicy, Retailer};
use crate::models::LoadMethod;
use clap::Parser;
use std::path::PathBuf;

/// Grocery Catalog Ingest - ETL Pipeline
///
/// Extract retailer product catalogs and load them into PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "grocery-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the pipeline config file
    #[arg(short = 'c', long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,

    /// Database connection URL (overrides DATABASE_URL env var)
    #[arg(short = 'd', long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Retailer to extract (overrides the config file)
    #[arg(short = 'r', long, value_enum)]
    pub retailer: Option<Retailer>,

    /// Load method (overrides the config file)
    #[arg(short = 'm', long, value_enum)]
    pub load_method: Option<LoadMethod>,

    /// Rows per load chunk; zero or less loads each table in one unit
    #[arg(short = 'b', long, value_name = "ROWS", allow_negative_numbers = true)]
    pub chunk_size: Option<i64>,

    /// Abort the run on the first failed page instead of skipping it
    #[arg(long)]
    pub fail_fast: bool,

    /// Maximum number of database connections
    #[arg(long, value_name = "COUNT", default_value = "5")]
    pub max_connections: u32,
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_connections == 0 {
            anyhow::bail!("Max connections must be greater than 0");
        }

        if let Some(url) = &self.database_url {
            if url.trim().is_empty() {
                anyhow::bail!("Database URL must not be empty");
            }
        }

        Ok(())
    }

    /// Apply command-line overrides on top of the file config
    pub fn apply(&self, config: &mut Config) {
        if let Some(retailer) = self.retailer {
            config.retailer = retailer;
        }
        if let Some(method) = self.load_method {
            config.load.load_method = method;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.load.chunk_size = chunk_size;
        }
        if self.fail_fast {
            config.extract.on_fetch_error = FetchPolicy::FailFast;
        }
    }
}
