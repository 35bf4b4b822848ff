//! Balance calculation over the append-only ledger
//!
//! A balance is never stored. It is the latest [`BalanceSnapshot`] (or zero)
//! plus the signed sum of every transaction recorded after that snapshot. The
//! snapshot is read under a row lock held until the unit of work ends, so a
//! concurrent transfer cannot commit between the snapshot read and the log
//! read.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::SnapshotPolicy;
use crate::store::{LedgerStore, StoreError, UnitOfWork};
use crate::types::{AccountId, LedgerError, Transaction, TransactionId};

use super::unit;

/// Result of folding the ledger for one account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceReading {
    pub balance: Decimal,
    /// Highest transaction id included in `balance` (0 when none)
    pub last_transaction_id: TransactionId,
    /// Transactions folded on top of the starting point
    pub folded: usize,
}

/// Fold transactions on top of a starting balance
///
/// `entries` must hold only transactions with id greater than `last_id`.
pub fn fold_transactions(
    start: Decimal,
    last_id: TransactionId,
    entries: &[Transaction],
) -> Result<BalanceReading, StoreError> {
    let mut balance = start;
    let mut last_transaction_id = last_id;
    for entry in entries {
        balance = balance.checked_add(entry.signed_amount()).ok_or_else(|| {
            StoreError::Integrity(format!(
                "balance overflow folding transaction {} of account {}",
                entry.id, entry.account_id
            ))
        })?;
        last_transaction_id = last_transaction_id.max(entry.id);
    }
    Ok(BalanceReading {
        balance,
        last_transaction_id,
        folded: entries.len(),
    })
}

/// Current balance, starting from the latest snapshot
///
/// Locks the snapshot row (and, for the in-memory store, the account) for the
/// rest of the unit of work.
pub async fn compute_balance<U: UnitOfWork>(
    unit: &mut U,
    account: AccountId,
) -> Result<BalanceReading, StoreError> {
    let (start, last_id) = match unit.latest_snapshot_for_update(account).await? {
        Some(snapshot) => (snapshot.balance, snapshot.last_transaction_id),
        None => (Decimal::ZERO, 0),
    };
    let entries = unit.transactions_after(account, last_id).await?;
    fold_transactions(start, last_id, &entries)
}

/// Current balance folded from the first transaction, ignoring snapshots
pub async fn compute_from_scratch<U: UnitOfWork>(
    unit: &mut U,
    account: AccountId,
) -> Result<BalanceReading, StoreError> {
    let entries = unit.transactions_after(account, 0).await?;
    fold_transactions(Decimal::ZERO, 0, &entries)
}

/// Write a fresh snapshot when the policy says the fold got long enough
pub async fn refresh_snapshot<U: UnitOfWork>(
    unit: &mut U,
    account: AccountId,
    reading: &BalanceReading,
    policy: SnapshotPolicy,
) -> Result<(), StoreError> {
    if !policy.should_snapshot(reading.folded) {
        return Ok(());
    }
    let snapshot = unit
        .insert_snapshot(account, reading.balance, reading.last_transaction_id)
        .await?;
    debug!(
        account_id = account,
        snapshot_id = snapshot.id,
        last_transaction_id = snapshot.last_transaction_id,
        "balance snapshot refreshed"
    );
    Ok(())
}

/// Snapshot-assisted and from-scratch balances of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub account_id: AccountId,
    pub snapshot_assisted: Decimal,
    pub from_scratch: Decimal,
    pub last_transaction_id: TransactionId,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.snapshot_assisted == self.from_scratch
    }
}

/// GetBalance and Reconcile operations
#[derive(Debug)]
pub struct BalanceCalculator<S> {
    store: Arc<S>,
    policy: SnapshotPolicy,
    cancel: CancellationToken,
}

impl<S> Clone for BalanceCalculator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: LedgerStore> BalanceCalculator<S> {
    pub fn new(store: Arc<S>, policy: SnapshotPolicy) -> Self {
        Self {
            store,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current balance of an existing account
    ///
    /// # Errors
    ///
    /// * `Validation` - account id is zero
    /// * `NotFound` - the account does not exist
    /// * `Internal` - store failure or cancellation
    #[instrument(skip(self))]
    pub async fn get_balance(&self, account_id: AccountId) -> Result<Decimal, LedgerError> {
        const OPERATION: &str = "get_balance";
        if account_id == 0 {
            return Err(LedgerError::validation("account id is required"));
        }

        let mut unit = unit::begin(&*self.store, &self.cancel, OPERATION).await?;
        match self.read_locked(&mut unit, account_id).await {
            Ok(Some(reading)) => {
                unit::commit(unit, &self.cancel, OPERATION).await?;
                Ok(reading.balance)
            }
            Ok(None) => {
                unit::abort(unit, OPERATION).await;
                Err(LedgerError::account_not_found(account_id))
            }
            Err(err) => {
                unit::abort(unit, OPERATION).await;
                Err(unit::store_failure(OPERATION, err))
            }
        }
    }

    async fn read_locked(
        &self,
        unit: &mut S::Unit,
        account_id: AccountId,
    ) -> Result<Option<BalanceReading>, StoreError> {
        if unit.lock_account(account_id).await?.is_none() {
            return Ok(None);
        }
        let reading = compute_balance(unit, account_id).await?;
        refresh_snapshot(unit, account_id, &reading, self.policy).await?;
        Ok(Some(reading))
    }

    /// Compare the snapshot-assisted balance with a full fold of the log
    #[instrument(skip(self))]
    pub async fn reconcile(&self, account_id: AccountId) -> Result<Reconciliation, LedgerError> {
        const OPERATION: &str = "reconcile";
        if account_id == 0 {
            return Err(LedgerError::validation("account id is required"));
        }

        let mut unit = unit::begin(&*self.store, &self.cancel, OPERATION).await?;
        let readings = async {
            if unit.lock_account(account_id).await?.is_none() {
                return Ok(None);
            }
            let assisted = compute_balance(&mut unit, account_id).await?;
            let scratch = compute_from_scratch(&mut unit, account_id).await?;
            Ok::<_, StoreError>(Some((assisted, scratch)))
        }
        .await;

        let (assisted, scratch) = match readings {
            Ok(Some(readings)) => readings,
            Ok(None) => {
                unit::abort(unit, OPERATION).await;
                return Err(LedgerError::account_not_found(account_id));
            }
            Err(err) => {
                unit::abort(unit, OPERATION).await;
                return Err(unit::store_failure(OPERATION, err));
            }
        };
        unit::abort(unit, OPERATION).await;

        let reconciliation = Reconciliation {
            account_id,
            snapshot_assisted: assisted.balance,
            from_scratch: scratch.balance,
            last_transaction_id: scratch.last_transaction_id,
        };
        if !reconciliation.is_consistent() {
            warn!(
                account_id,
                snapshot_assisted = %reconciliation.snapshot_assisted,
                from_scratch = %reconciliation.from_scratch,
                "snapshot disagrees with transaction log"
            );
        }
        Ok(reconciliation)
    }
}
