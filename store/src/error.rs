// store/src/error.rs

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A duplicate-key write. Upsert and unordered-bulk-insert callers are
    /// expected to treat this as a no-op rather than propagate it; it is
    /// surfaced so single-record inserts can decide for themselves.
    #[error("conflicting key: {0}")]
    Conflict(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(e: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        if matches!(*e.kind, ErrorKind::Write(_)) && e.to_string().contains("E11000") {
            StoreError::Conflict(e.to_string())
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }
}
