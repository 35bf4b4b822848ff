//! Store-layer errors
//!
//! These describe what went wrong below the unit-of-work boundary. The engine
//! decides how each one surfaces in the [`LedgerError`] taxonomy; anything it
//! does not map explicitly becomes `Internal`.

use thiserror::Error;

use crate::types::LedgerError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Insert collided with an existing key
    #[error("unique constraint violated in {operation}: {message}")]
    UniqueViolation { operation: String, message: String },

    /// Insert referenced a row that does not exist
    #[error("foreign key violated in {operation}: {message}")]
    ForeignKeyViolation { operation: String, message: String },

    /// Waiting for a row lock exceeded the configured timeout
    #[error("lock timeout in {operation}")]
    LockTimeout { operation: String },

    /// Store cannot be reached (pool closed, connection refused, ...)
    #[error("store unavailable in {operation}: {message}")]
    Unavailable { operation: String, message: String },

    /// Stored data breaks a ledger invariant
    #[error("ledger integrity violated: {0}")]
    Integrity(String),

    /// Any other query failure
    #[error("query failed in {operation}: {message}")]
    Query { operation: String, message: String },
}

impl StoreError {
    pub fn unique_violation(operation: &str, message: impl Into<String>) -> Self {
        StoreError::UniqueViolation {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn foreign_key_violation(operation: &str, message: impl Into<String>) -> Self {
        StoreError::ForeignKeyViolation {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn lock_timeout(operation: &str) -> Self {
        StoreError::LockTimeout {
            operation: operation.to_string(),
        }
    }

    pub fn query(operation: &str, message: impl Into<String>) -> Self {
        StoreError::Query {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        LedgerError::internal(error.to_string())
    }
}
