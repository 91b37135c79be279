/// Config Module
///
/// Reads the pipeline configuration file. Everything the pipeline needs is
/// resolved once at startup into a `Config` and passed down explicitly.
use crate::error::{IngestError, Result};
use crate::etl::schema::ColumnType;
use crate::models::LoadMethod;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Environment variable holding the Coles API subscription key
pub const COLES_SUBSCRIPTION_KEY_VAR: &str = "COLES_SUBSCRIPTION_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Retailer {
    Woolworths,
    Coles,
}

impl Retailer {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Woolworths => "woolworths",
            Self::Coles => "coles",
        }
    }

    /// Category slugs that are not product categories
    pub fn default_excluded_categories(&self) -> Vec<String> {
        let slugs: &[&str] = match self {
            Self::Woolworths => &["specials", "front-of-store", "mother-s-day"],
            Self::Coles => &["dropped-locked", "back-to-school"],
        };
        slugs.iter().map(|s| s.to_string()).collect()
    }
}

/// What to do when a category or page request fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// Propagate the network error and fail the run
    FailFast,
    /// Log a warning and skip the failed page or category
    #[default]
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub retailer: Retailer,
    pub extract: ExtractConfig,
    #[serde(default)]
    pub load: LoadConfig,
    pub meta: MetaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub category_url: String,
    pub product_url: String,
    pub schema_name: String,
    #[serde(default)]
    pub on_fetch_error: FetchPolicy,
    #[serde(default)]
    pub excluded_categories: Option<Vec<String>>,
    #[serde(default, skip_serializing)]
    pub subscription_key: Option<String>,
    /// Woolworths `_abck` cookie; fetched from the product URL when absent
    #[serde(default, skip_serializing)]
    pub cookie: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default)]
    pub load_method: LoadMethod,
    /// Rows per chunk; zero or less writes each table in one unit
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    /// Upsert keys used for tables without their own override
    #[serde(default)]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub tables: BTreeMap<String, TableOverride>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            load_method: LoadMethod::default(),
            chunk_size: default_chunk_size(),
            key_columns: Vec::new(),
            tables: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableOverride {
    #[serde(default)]
    pub key_columns: Option<Vec<String>>,
    #[serde(default)]
    pub column_types: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub log_table: String,
}

fn default_chunk_size() -> i64 {
    2500
}

impl Config {
    /// Read a TOML config file.
    ///
    /// Not validated here: call `validate` once environment and CLI overrides are applied.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| IngestError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("extract.category_url", &self.extract.category_url),
            ("extract.product_url", &self.extract.product_url),
            ("extract.schema_name", &self.extract.schema_name),
            ("meta.log_table", &self.meta.log_table),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(IngestError::Config(format!("{} must not be empty", field)));
            }
        }

        if self.retailer == Retailer::Coles && self.extract.subscription_key.is_none() {
            tracing::warn!("No Coles subscription key configured; category requests will likely be rejected");
        }

        Ok(())
    }

    /// Fill secrets that were not set in the file from the environment
    pub fn apply_env(&mut self) {
        if self.extract.subscription_key.is_none() {
            self.extract.subscription_key = std::env::var(COLES_SUBSCRIPTION_KEY_VAR).ok();
        }
    }

    pub fn excluded_categories(&self) -> Vec<String> {
        self.extract.excluded_categories.clone().unwrap_or_else(|| self.retailer.default_excluded_categories())
    }

    /// Upsert keys for a table: its override, else the load-level default
    pub fn key_columns_for(&self, table_name: &str) -> Vec<String> {
        self.load
            .tables
            .get(table_name)
            .and_then(|t| t.key_columns.clone())
            .unwrap_or_else(|| self.load.key_columns.clone())
    }

    /// Declared column types for a table. Unknown type names are schema errors.
    pub fn column_types_for(&self, table_name: &str) -> Result<HashMap<String, ColumnType>> {
        match self.load.tables.get(table_name) {
            Some(table) => table
                .column_types
                .iter()
                .map(|(column, name)| Ok((column.clone(), ColumnType::from_name(name)?)))
                .collect(),
            None => Ok(HashMap::new()),
        }
    }

    /// Configuration as recorded in the metadata log; secrets are not serialized
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
