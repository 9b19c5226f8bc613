// Error types shared by the store, the service and the reconciler

use thiserror::Error;

pub type StationResult<T> = Result<T, StationError>;

#[derive(Debug, Error)]
pub enum StationError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("station store lock poisoned")]
    LockPoisoned,

    /// A stored row could not be decoded
    #[error("corrupt station record: {0}")]
    Corrupt(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StationError {
    /// True when the caller sent something unusable (as opposed to a store failure)
    pub fn is_client_error(&self) -> bool {
        matches!(self, StationError::InvalidInput(_))
    }
}
