//! Storage-layer errors.

use thiserror::Error;

/// Errors raised by the persistence backends.
///
/// `Unavailable` is the only variant the pipeline treats as transient: the
/// operation did not take effect and may be retried later.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or is temporarily locked.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A record referenced by the operation does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The operation conflicts with an existing record.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored record could not be encoded or decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Any other backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates a not-found error for the given record kind.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Returns true when the failure is transient and nothing was recorded.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match e.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull,
            ) => Self::Unavailable(e.to_string()),
            Some(ErrorCode::ConstraintViolation) => Self::Conflict(e.to_string()),
            _ => Self::Backend(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt(e.to_string())
    }
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
