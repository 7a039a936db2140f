use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Channel send error")]
    ChannelSend,
}

impl Error {
    /// True for failures of the backing store, the only errors the ingestion
    /// pipeline surfaces instead of recovering locally.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Migration(_))
    }

    /// Connection-level storage failure, as opposed to a rejected statement.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(db_err) => crate::store::is_transient_error(db_err),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
