//! Account-related types for the ledger
//!
//! An account carries identity only. Its balance is never stored on the row;
//! it is always derived from the transaction log (see [`crate::core::balance`]).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::error::LedgerError;
use super::money::{validate_account_id, validate_amount, ValidationErrors};

/// Account identifier
///
/// Chosen by the caller at creation time; must be non-zero and unique.
pub type AccountId = u64;

/// Ledger account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account stamped with the current time
    pub fn new(id: AccountId) -> Self {
        let now = Utc::now();
        Account {
            id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Request to open an account with its mandatory opening balance
#[derive(Debug, Clone, PartialEq)]
pub struct CreateAccount {
    pub account_id: AccountId,
    pub initial_balance: Decimal,
}

impl CreateAccount {
    pub fn new(account_id: AccountId, initial_balance: Decimal) -> Self {
        Self {
            account_id,
            initial_balance,
        }
    }

    /// Check the request before any store work happens
    ///
    /// All violations are collected and reported together.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let mut errors = ValidationErrors::default();
        validate_account_id(&mut errors, "account id", self.account_id);
        validate_amount(&mut errors, "initial balance", self.initial_balance);
        errors.into_result()
    }
}
