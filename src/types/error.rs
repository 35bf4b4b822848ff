//! Error types for the ledger engine
//!
//! Every failure an engine operation can report maps onto a closed taxonomy of
//! [`ErrorKind`]s. Callers branch on the kind; the message of every kind except
//! `Internal` is safe to show to an end user.
//!
//! # Error Categories
//!
//! - **Validation**: malformed input, always detected before touching the store
//! - **NotFound**: a referenced account does not exist
//! - **Conflict**: an account identifier is already in use
//! - **InsufficientFunds**: source balance below the requested amount
//! - **TransferFailed**: store-side rejection with an unrecognised diagnostic
//! - **Internal**: store failures, undecodable results, commit failures

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::account::AccountId;

/// Message shown to end users in place of any `Internal` error
pub const OPAQUE_INTERNAL_MESSAGE: &str = "it's not you, it's us. please contact support";

/// Closed error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InsufficientFunds,
    TransferFailed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::TransferFailed => "transfer_failed",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for ledger operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Malformed input; all violations joined with ", "
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Referenced account does not exist
    #[error("{message}")]
    NotFound { message: String },

    /// Account identifier already in use
    #[error("account {account} already exists")]
    Conflict { account: AccountId },

    /// Source balance below the requested amount
    ///
    /// `available` is only known when the balance was computed in-process.
    #[error("insufficient funds in account {account}: requested {requested}{}", available.map(|a| format!(", available {}", a)).unwrap_or_default())]
    InsufficientFunds {
        account: AccountId,
        requested: Decimal,
        available: Option<Decimal>,
    },

    /// Store-side rejection that matches no known category
    #[error("transfer funds failed: {message}")]
    TransferFailed { message: String },

    /// Store communication, decoding, or commit failure
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        LedgerError::NotFound {
            message: message.into(),
        }
    }

    /// NotFound error for a specific account
    pub fn account_not_found(account: AccountId) -> Self {
        LedgerError::NotFound {
            message: format!("account {} does not exist", account),
        }
    }

    pub fn conflict(account: AccountId) -> Self {
        LedgerError::Conflict { account }
    }

    pub fn insufficient_funds(
        account: AccountId,
        requested: Decimal,
        available: Option<Decimal>,
    ) -> Self {
        LedgerError::InsufficientFunds {
            account,
            requested,
            available,
        }
    }

    pub fn transfer_failed(message: impl Into<String>) -> Self {
        LedgerError::TransferFailed {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        LedgerError::Internal {
            message: message.into(),
        }
    }

    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation { .. } => ErrorKind::Validation,
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::Conflict { .. } => ErrorKind::Conflict,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::TransferFailed { .. } => ErrorKind::TransferFailed,
            LedgerError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Message safe to show to an end user
    ///
    /// Internal errors are replaced by an opaque message; their detail belongs
    /// in the logs only.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::Internal { .. } => OPAQUE_INTERNAL_MESSAGE.to_string(),
            LedgerError::InsufficientFunds { .. } => "your account has insufficient funds".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case::validation(
        LedgerError::validation("account id is required"),
        "validation error: account id is required"
    )]
    #[case::not_found(LedgerError::account_not_found(999), "account 999 does not exist")]
    #[case::conflict(LedgerError::conflict(100), "account 100 already exists")]
    #[case::insufficient_with_balance(
        LedgerError::insufficient_funds(100, dec!(500.01), Some(dec!(500.00))),
        "insufficient funds in account 100: requested 500.01, available 500.00"
    )]
    #[case::insufficient_without_balance(
        LedgerError::insufficient_funds(100, dec!(10), None),
        "insufficient funds in account 100: requested 10"
    )]
    #[case::transfer_failed(
        LedgerError::transfer_failed("daily limit exceeded"),
        "transfer funds failed: daily limit exceeded"
    )]
    #[case::internal(LedgerError::internal("commit failed"), "internal error: commit failed")]
    fn test_error_display(#[case] error: LedgerError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case(LedgerError::validation("x"), ErrorKind::Validation)]
    #[case(LedgerError::not_found("x"), ErrorKind::NotFound)]
    #[case(LedgerError::conflict(1), ErrorKind::Conflict)]
    #[case(LedgerError::insufficient_funds(1, dec!(1), None), ErrorKind::InsufficientFunds)]
    #[case(LedgerError::transfer_failed("x"), ErrorKind::TransferFailed)]
    #[case(LedgerError::internal("x"), ErrorKind::Internal)]
    fn test_error_kind(#[case] error: LedgerError, #[case] expected: ErrorKind) {
        assert_eq!(error.kind(), expected);
    }

    #[test]
    fn test_internal_errors_are_opaque_to_users() {
        let err = LedgerError::internal("connection reset by peer");
        assert_eq!(err.user_message(), OPAQUE_INTERNAL_MESSAGE);
    }

    #[test]
    fn test_validation_errors_are_shown_to_users() {
        let err = LedgerError::validation("initial balance is required");
        assert_eq!(err.user_message(), "validation error: initial balance is required");
    }
}
