use crate::types::ClientId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Postgres error: {0}")]
    Postgres(#[from] postgres::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Client {client_id} appears more than once in the '{feature}' row set")]
    DuplicateClient { feature: &'static str, client_id: ClientId },

    #[error("Malformed artifact {path}: {reason}")]
    Artifact { path: String, reason: String },

    #[error("Upload of '{key}' to bucket '{bucket}' failed: {message}")]
    Upload { bucket: String, key: String, message: String },

    #[error("Command '{step}' exited with {status}")]
    CommandFailed { step: String, status: String },

    #[error("Task '{task}' failed after {attempts} attempt(s): {source}")]
    TaskFailed {
        task: &'static str,
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
