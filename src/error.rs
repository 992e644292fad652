use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job has been nullified: {0}")]
    Nullified(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Server shutting down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, ControllerError>;
