use thiserror::Error;

use common::OrderId;

use crate::Version;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row lock could not be acquired within the configured timeout.
    #[error("Timed out waiting for lock on {resource}")]
    LockTimeout { resource: String },

    /// A uniqueness constraint rejected the write.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// The order was modified by another transaction.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// The row targeted by an update does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// The database aborted the transaction (serialization failure or deadlock).
    #[error("Transaction aborted by the database: {0}")]
    Aborted(String),

    /// A stored value could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true when retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::LockTimeout { .. }
            | StoreError::ConcurrencyConflict { .. }
            | StoreError::Aborted(_) => true,
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }

    /// Returns the violated constraint name, if this is a uniqueness error.
    pub fn violated_constraint(&self) -> Option<&str> {
        match self {
            StoreError::UniqueViolation { constraint } => Some(constraint),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            match db_err.code().as_deref() {
                // lock_not_available, raised when `lock_timeout` expires
                Some("55P03") => {
                    metrics::counter!("store_lock_timeouts_total").increment(1);
                    return StoreError::LockTimeout {
                        resource: db_err.table().unwrap_or("row").to_string(),
                    };
                }
                Some("23505") => {
                    return StoreError::UniqueViolation {
                        constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                    };
                }
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => {
                    return StoreError::Aborted(db_err.message().to_string());
                }
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeouts_and_conflicts_are_transient() {
        assert!(
            StoreError::LockTimeout {
                resource: "stock".into()
            }
            .is_transient()
        );
        assert!(StoreError::Aborted("deadlock".into()).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn constraint_and_data_errors_are_permanent() {
        let unique = StoreError::UniqueViolation {
            constraint: "payment_events_pkey".into(),
        };
        assert!(!unique.is_transient());
        assert_eq!(unique.violated_constraint(), Some("payment_events_pkey"));
        assert!(!StoreError::Corrupt("bad status".into()).is_transient());
    }
}
