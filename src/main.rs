/// Grocery Catalog Ingest
///
/// An ETL pipeline for extracting retailer product catalogs and loading them
/// into PostgreSQL, with every run recorded in a metadata log table.
mod cli;
mod client;
mod config;
mod db;
mod error;
mod etl;
mod logging;
mod models;
mod pipeline;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use config::Config;
use db::Database;
use logging::RunLog;
use pipeline::{Pipeline, RunOutcome};
use std::env;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let run_log = RunLog::new();
    if let Err(e) = logging::init_tracing("info", &run_log) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();

    let code = match run(&cli, &run_log).await {
        Ok(outcome) => {
            pipeline::print_final_stats(&outcome);
            if outcome.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    };

    // The run log is printed whatever the outcome
    println!("\n{}", run_log.contents());
    code
}

async fn run(cli: &Cli, run_log: &RunLog) -> Result<RunOutcome> {
    cli.validate()?;

    tracing::info!("Reading config file {}", cli.config.display());
    let mut config = Config::from_file(&cli.config)?;
    config.apply_env();
    cli.apply(&mut config);
    config.validate()?;

    println!("🚀 Starting {} ingest...", config.retailer.as_str());

    let database_url = match &cli.database_url {
        Some(url) => url.clone(),
        None => {
            env::var("DATABASE_URL").context("DATABASE_URL not found in environment. Please check your .env file")?
        }
    };

    println!("\n💾 Connecting to PostgreSQL database...");
    let database =
        Database::new(&database_url, cli.max_connections).await.context("Failed to connect to PostgreSQL database")?;

    // Test database connection
    database.test_connection().await.context("Database connection test failed")?;
    println!("✅ Database connected successfully!");

    let extractor = etl::extract::build_extractor(&config).context("Failed to create retailer client")?;

    let outcome = Pipeline::new(&database, extractor, config, run_log.clone())
        .run()
        .await
        .context("Failed to record pipeline run")?;

    Ok(outcome)
}
