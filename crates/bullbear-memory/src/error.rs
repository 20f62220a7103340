use bullbear_models::{RecordId, StateInvariantViolation};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Similarity index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("No unlabeled record from the latest run to reflect on")]
    NothingToReflect,

    #[error("Memory record {0} is already labeled")]
    AlreadyLabeled(RecordId),

    #[error("Unknown memory record {0}")]
    UnknownRecord(RecordId),

    #[error("Corrupt memory row: {0}")]
    Corrupt(String),

    #[error("Memory store not available: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Invariant(#[from] StateInvariantViolation),
}
