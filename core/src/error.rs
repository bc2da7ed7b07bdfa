use thiserror::Error;

use crate::types::{BatchId, RecordId};

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No upload records found for batch '{batch_ref}'")]
    BatchNotFound { batch_ref: BatchId },

    #[error("Reconciliation already in flight for batch '{batch_ref}'")]
    ConcurrentRun { batch_ref: BatchId },

    #[error("Version conflict writing record '{record_id}' (expected version {expected})")]
    RecordWriteConflict { record_id: RecordId, expected: i64 },

    #[error("Failed to persist reconciliation result for batch '{batch_ref}': {source}")]
    Persistence {
        batch_ref: BatchId,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ReconResult<T> = Result<T, ReconError>;
