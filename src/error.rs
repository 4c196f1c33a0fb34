use chrono::NaiveDateTime;
use postgres_unit_of_work::TransactionError;
use uuid::Uuid;

/// Error type for data-source, cache and booking operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Remote request failed: {0}")]
    Remote(String),

    #[error("Failed to decode rows from '{table}': {message}")]
    Decode { table: String, message: String },

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid time value: {0}")]
    InvalidTime(String),

    #[error("Slot {at} is not available for expert {expert_id}")]
    SlotUnavailable { expert_id: Uuid, at: NaiveDateTime },

    #[error("No authenticated admin")]
    Unauthenticated,

    #[error("Transaction commit failed: {0}")]
    CommitFailed(String),

    #[error("Transaction rollback failed: {0}")]
    RollbackFailed(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let unique_violation = err
            .as_database_error()
            .is_some_and(|db_err| db_err.is_unique_violation());
        if unique_violation {
            StoreError::Conflict(err.to_string())
        } else {
            StoreError::Remote(err.to_string())
        }
    }
}

/// Conversion from StoreError to TransactionError
impl From<StoreError> for TransactionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CommitFailed(msg) => TransactionError::CommitFailed(msg),
            StoreError::RollbackFailed(msg) => TransactionError::RollbackFailed(msg),
            other => TransactionError::CommitFailed(format!("Store error: {other}")),
        }
    }
}
