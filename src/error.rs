/// Error Module
///
/// Typed errors shared by the extract, load and metadata stages.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Non-2xx response or transport failure while calling a retailer API
    #[error("network error calling {url}: {message}")]
    Network { url: String, status: Option<u16>, message: String },

    /// The database could not be reached
    #[error("database connection error: {0}")]
    Connection(String),

    /// A column type could not be mapped or a value does not fit its column
    #[error("schema error: {0}")]
    Schema(String),

    /// Key columns missing, null or violated
    #[error("constraint error: {0}")]
    Constraint(String),

    /// Any other database failure
    #[error("query error: {0}")]
    Query(String),

    /// A retailer response did not have the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    pub fn network(url: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Network { url: url.to_string(), status, message: message.into() }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => IngestError::Connection(e.to_string()),
            sqlx::Error::Database(db_err) => match db_err.kind() {
                sqlx::error::ErrorKind::UniqueViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::CheckViolation => IngestError::Constraint(db_err.to_string()),
                _ => IngestError::Query(db_err.to_string()),
            },
            _ => IngestError::Query(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        let status = e.status().map(|s| s.as_u16());
        IngestError::Network { url, status, message: e.to_string() }
    }
}
