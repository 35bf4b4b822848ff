//! Transfer-related types for the ledger
//!
//! A transfer row exists if and only if the movement of funds committed. Failed
//! attempts leave no trace in the store; they only surface as a
//! [`TransferOutcome`] with `success == false`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::account::AccountId;
use super::error::LedgerError;
use super::money::{validate_account_id, validate_amount, ValidationErrors};

/// Transfer identifier
///
/// Zero means "no identifier" in a packed outcome.
pub type TransferId = u64;

/// Committed transfer between two distinct accounts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    pub id: TransferId,
    pub source_account_id: AccountId,
    pub destination_account_id: AccountId,
    pub created_at: DateTime<Utc>,
}

/// Request to move `amount` from `source` to `destination`
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub source: AccountId,
    pub destination: AccountId,
    pub amount: Decimal,
}

impl TransferRequest {
    pub fn new(source: AccountId, destination: AccountId, amount: Decimal) -> Self {
        Self {
            source,
            destination,
            amount,
        }
    }

    /// Local checks performed before any row is touched
    pub fn validate(&self) -> Result<(), LedgerError> {
        let mut errors = ValidationErrors::default();
        validate_account_id(&mut errors, "source account id", self.source);
        validate_account_id(&mut errors, "destination account id", self.destination);
        validate_amount(&mut errors, "amount", self.amount);
        if self.source != 0 && self.source == self.destination {
            errors.push("cannot transfer to the same account");
        }
        errors.into_result()
    }
}

/// Structured result of one transfer attempt
///
/// This is the typed form of the packed `(transfer_id,success,message)` triple
/// returned by the server-side transfer procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    /// Identifier of the committed transfer, 0 when none was persisted
    pub transfer_id: TransferId,
    pub success: bool,
    /// Diagnostic text; a human-readable confirmation on success
    pub message: String,
}

impl TransferOutcome {
    pub const COMPLETED: &'static str = "Transfer completed successfully";

    pub fn completed(transfer_id: TransferId) -> Self {
        Self {
            transfer_id,
            success: true,
            message: Self::COMPLETED.to_string(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            transfer_id: 0,
            success: false,
            message: message.into(),
        }
    }
}
