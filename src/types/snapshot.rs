//! Balance snapshot: a cached checkpoint over the transaction log
//!
//! `balance` plus the signed sum of every transaction of the account with an id
//! greater than `last_transaction_id` equals the true balance. Snapshots can be
//! deleted and rebuilt from the log without losing information.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::account::AccountId;
use super::transaction::TransactionId;

pub type SnapshotId = u64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSnapshot {
    pub id: SnapshotId,
    pub account_id: AccountId,
    pub balance: Decimal,
    /// Last transaction folded into `balance`
    pub last_transaction_id: TransactionId,
    pub created_at: DateTime<Utc>,
}
