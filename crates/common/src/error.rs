use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Market data gateway error: {0}")]
    Gateway(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid alert configuration: {0}")]
    InvalidConfig(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
