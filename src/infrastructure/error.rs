use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("API authentication expired or missing")]
    Unauthorized,
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Channel error: {0}")]
    Channel(String),
}
