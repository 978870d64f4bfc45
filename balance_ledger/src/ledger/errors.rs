//! Ledger error types.

use super::models::{UnknownTransactionType, UserId};
use rust_decimal::Decimal;
use thiserror::Error;

/// SQL state for serialization failures
const SERIALIZATION_FAILURE: &str = "40001";

/// SQL state for a detected deadlock
const DEADLOCK_DETECTED: &str = "40P01";

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Referenced user does not exist
    #[error("User {0} not found")]
    UserNotFound(UserId),

    /// Source balance is absent or below the requested amount
    #[error("Insufficient funds for user {user_id}: available {available}, required {required}")]
    InsufficientFunds {
        user_id: UserId,
        available: Decimal,
        required: Decimal,
    },

    /// Amount is not positive or carries more decimal places than allowed
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Transfer request that can never succeed
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    /// Unique key rejected a balance row because a concurrent unit of work created it first.
    /// Recovered inside the balance store and not returned by ledger operations.
    #[error("Balance for user {0} was provisioned concurrently")]
    DuplicateProvisioning(UserId),

    /// Waiting for a row lock exceeded the unit of work's lock timeout
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Store rejected a write that breaks a table constraint
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Stored data could not be decoded
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// Store misuse or failure not covered by the database driver
    #[error("Store error: {0}")]
    Store(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Coarse classification of a ledger error for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Referenced entity does not exist
    NotFound,
    /// Request conflicts with current state (e.g. insufficient funds)
    Conflict,
    /// Request is malformed
    InvalidInput,
    /// Failure is temporary; retrying the whole operation is safe
    Transient,
    /// Failure is not expected to go away on retry
    Internal,
}

impl LedgerError {
    /// Classify the error so callers can tell bad requests from retryable failures
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::UserNotFound(_) => ErrorClass::NotFound,
            LedgerError::InsufficientFunds { .. } => ErrorClass::Conflict,
            LedgerError::InvalidAmount(_) | LedgerError::InvalidTransfer(_) => {
                ErrorClass::InvalidInput
            }
            LedgerError::DuplicateProvisioning(_) | LedgerError::LockTimeout(_) => {
                ErrorClass::Transient
            }
            LedgerError::Database(err) if is_transient(err) => ErrorClass::Transient,
            LedgerError::ConstraintViolation(_)
            | LedgerError::CorruptRecord(_)
            | LedgerError::Store(_)
            | LedgerError::Database(_) => ErrorClass::Internal,
        }
    }

    /// Whether retrying the whole operation may succeed
    ///
    /// A failed operation never leaves partial state behind, so retrying is safe.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Database and store details are sanitized; user-facing conditions keep
    /// their message.
    pub fn client_message(&self) -> String {
        match self {
            LedgerError::UserNotFound(_) => "User not found".to_string(),
            LedgerError::InsufficientFunds { .. } => "Insufficient funds".to_string(),
            LedgerError::InvalidAmount(_) | LedgerError::InvalidTransfer(_) => self.to_string(),
            LedgerError::DuplicateProvisioning(_) | LedgerError::LockTimeout(_) => {
                "Ledger is busy, please retry".to_string()
            }
            LedgerError::Database(err) if is_transient(err) => {
                "Ledger is busy, please retry".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<UnknownTransactionType> for LedgerError {
    fn from(err: UnknownTransactionType) -> Self {
        LedgerError::CorruptRecord(err.to_string())
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
        ),
        _ => false,
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
