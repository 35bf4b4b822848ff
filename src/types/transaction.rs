//! Transaction-related types for the ledger
//!
//! A transaction is one immutable entry of the append-only ledger. The amount is
//! always stored as an unsigned magnitude; the [`Direction`] decides whether it
//! increases or decreases the owning account's balance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::account::AccountId;
use super::transfer::TransferId;

/// Ledger transaction identifier
///
/// Allocated from a store-owned, monotonically increasing sequence. Zero is
/// never a valid transaction id and is used as "before the first entry".
pub type TransactionId = u64;

/// Direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Increases the account balance
    Credit,

    /// Decreases the account balance
    Debit,
}

impl Direction {
    /// Storage representation (`CREDIT` / `DEBIT`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "CREDIT",
            Direction::Debit => "DEBIT",
        }
    }

    /// Apply the direction to an unsigned magnitude
    pub fn sign(&self, magnitude: Decimal) -> Decimal {
        match self {
            Direction::Credit => magnitude,
            Direction::Debit => -magnitude,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREDIT" => Ok(Direction::Credit),
            "DEBIT" => Ok(Direction::Debit),
            other => Err(format!("unknown transaction direction '{}'", other)),
        }
    }
}

/// Committed ledger entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: TransactionId,

    /// Account whose balance this entry changes
    pub account_id: AccountId,

    /// Transfer this entry belongs to
    ///
    /// `None` only for the opening credit written at account creation.
    pub transfer_id: Option<TransferId>,

    /// Unsigned magnitude, always strictly positive
    pub amount: Decimal,

    pub direction: Direction,

    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Amount signed by direction (credits positive, debits negative)
    pub fn signed_amount(&self) -> Decimal {
        self.direction.sign(self.amount)
    }
}

/// Ledger entry that has not been inserted yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub account_id: AccountId,
    pub transfer_id: Option<TransferId>,
    pub amount: Decimal,
    pub direction: Direction,
}

impl NewTransaction {
    /// Credit entry, optionally linked to a transfer
    pub fn credit(account_id: AccountId, transfer_id: Option<TransferId>, amount: Decimal) -> Self {
        Self {
            account_id,
            transfer_id,
            amount,
            direction: Direction::Credit,
        }
    }

    /// Debit entry; debits only ever exist as the source half of a transfer
    pub fn debit(account_id: AccountId, transfer_id: TransferId, amount: Decimal) -> Self {
        Self {
            account_id,
            transfer_id: Some(transfer_id),
            amount,
            direction: Direction::Debit,
        }
    }
}
