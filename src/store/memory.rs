//! In-memory ledger store
//!
//! Tables live in `DashMap`s, so different accounts never contend on a global
//! lock. Row locks are per-account `tokio::sync::Mutex`es acquired as owned
//! guards and kept by the unit of work until it ends, which gives the same
//! blocking behaviour as `SELECT ... FOR UPDATE` on a relational store.
//!
//! # Atomicity
//!
//! A unit of work buffers every insert and applies them on commit under a
//! write gate. Readers that inspect the tables from outside a unit of work take
//! the gate for reading, so they observe either all of a commit or none of it.
//! Dropping a unit without committing discards its buffer and releases its
//! locks. Row locks of ids with no account are removed from the lock table on
//! release once nobody else holds or waits on them, so lookups of unknown ids
//! do not grow it.
//!
//! # Identifiers
//!
//! Ids come from atomic sequences and are consumed even when the unit of work
//! rolls back, mirroring database sequences. Every insert for an account is
//! made while holding that account's row lock, so one account's transaction ids
//! increase in commit order.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::codec;
use crate::core::transfer::apply_transfer;
use crate::types::{
    Account, AccountId, BalanceSnapshot, NewTransaction, Transaction, TransactionId, Transfer,
    TransferId, TransferRequest,
};

use super::{LedgerStore, StoreError, UnitOfWork};

/// Default bound on row-lock waits
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Tables {
    accounts: DashMap<AccountId, Account>,
    /// Append-only ledger, partitioned by owning account
    transactions: DashMap<AccountId, Vec<Transaction>>,
    transfers: DashMap<TransferId, Transfer>,
    snapshots: DashMap<AccountId, Vec<BalanceSnapshot>>,
    row_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    transaction_seq: AtomicU64,
    transfer_seq: AtomicU64,
    snapshot_seq: AtomicU64,
    commit_gate: RwLock<()>,
}

impl Tables {
    fn next_id(seq: &AtomicU64) -> u64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Thread-safe in-memory implementation of [`LedgerStore`]
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<Tables>,
    lock_timeout: Duration,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Tables::default()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Bound every row-lock wait by `lock_timeout`
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Committed account ids in ascending order
    pub fn account_ids(&self) -> Vec<AccountId> {
        let _gate = self.read_gate();
        let mut ids: Vec<AccountId> = self.tables.accounts.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Committed transactions of one account in id order
    pub fn transactions(&self, account: AccountId) -> Vec<Transaction> {
        let _gate = self.read_gate();
        self.tables
            .transactions
            .get(&account)
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }

    /// Every committed transaction in id order
    pub fn all_transactions(&self) -> Vec<Transaction> {
        let _gate = self.read_gate();
        let mut all: Vec<Transaction> = self
            .tables
            .transactions
            .iter()
            .flat_map(|entries| entries.value().clone())
            .collect();
        all.sort_by_key(|tx| tx.id);
        all
    }

    /// Every committed transfer in id order
    pub fn transfers(&self) -> Vec<Transfer> {
        let _gate = self.read_gate();
        let mut transfers: Vec<Transfer> =
            self.tables.transfers.iter().map(|e| e.value().clone()).collect();
        transfers.sort_by_key(|t| t.id);
        transfers
    }

    /// Committed snapshots of one account, oldest first
    pub fn snapshots(&self, account: AccountId) -> Vec<BalanceSnapshot> {
        let _gate = self.read_gate();
        self.tables
            .snapshots
            .get(&account)
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }

    /// Drop every cached snapshot of an account
    ///
    /// Balances stay correct because they can always be rebuilt from the log.
    pub fn purge_snapshots(&self, account: AccountId) {
        let _gate = self
            .tables
            .commit_gate
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.tables.snapshots.remove(&account);
    }

    fn read_gate(&self) -> std::sync::RwLockReadGuard<'_, ()> {
        self.tables
            .commit_gate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Unit = InMemoryUnit;

    async fn begin(&self) -> Result<Self::Unit, StoreError> {
        Ok(InMemoryUnit {
            tables: Arc::clone(&self.tables),
            lock_timeout: self.lock_timeout,
            held: HashMap::new(),
            pending: Pending::default(),
        })
    }

    /// Emulates the server-side routine: steps run in one unit of work that
    /// commits only on success, and the outcome comes back packed as text.
    async fn transfer_procedure(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<String, StoreError> {
        let mut unit = self.begin().await?;
        let request = TransferRequest::new(source, destination, amount);
        let outcome = apply_transfer(&mut unit, &request).await?;
        if outcome.success {
            unit.commit().await?;
        } else {
            unit.rollback().await?;
        }
        Ok(codec::encode(&outcome))
    }
}

#[derive(Debug, Default)]
struct Pending {
    accounts: Vec<Account>,
    transfers: Vec<Transfer>,
    transactions: Vec<Transaction>,
    snapshots: Vec<BalanceSnapshot>,
}

/// Unit of work over an [`InMemoryLedgerStore`]
#[derive(Debug)]
pub struct InMemoryUnit {
    tables: Arc<Tables>,
    lock_timeout: Duration,
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    pending: Pending,
}

impl InMemoryUnit {
    async fn acquire(&mut self, id: AccountId, operation: &str) -> Result<(), StoreError> {
        if self.held.contains_key(&id) {
            return Ok(());
        }
        // Clone the lock out of the map so no shard guard is held across the await
        let lock = Arc::clone(self.tables.row_locks.entry(id).or_default().value());
        let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::lock_timeout(operation))?;
        self.held.insert(id, guard);
        Ok(())
    }

    fn find_account(&self, id: AccountId) -> Option<Account> {
        self.pending
            .accounts
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .or_else(|| self.tables.accounts.get(&id).map(|a| a.value().clone()))
    }

    fn transfer_exists(&self, id: TransferId) -> bool {
        self.pending.transfers.iter().any(|t| t.id == id) || self.tables.transfers.contains_key(&id)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnit {
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.acquire(id, "lock_account").await?;
        Ok(self.find_account(id))
    }

    async fn insert_account(&mut self, id: AccountId) -> Result<Account, StoreError> {
        self.acquire(id, "insert_account").await?;
        if self.find_account(id).is_some() {
            return Err(StoreError::unique_violation(
                "insert_account",
                format!("account {} already exists", id),
            ));
        }
        let account = Account::new(id);
        self.pending.accounts.push(account.clone());
        Ok(account)
    }

    async fn latest_snapshot_for_update(
        &mut self,
        account: AccountId,
    ) -> Result<Option<BalanceSnapshot>, StoreError> {
        self.acquire(account, "latest_snapshot_for_update").await?;
        let pending = self
            .pending
            .snapshots
            .iter()
            .rev()
            .find(|s| s.account_id == account)
            .cloned();
        Ok(pending.or_else(|| {
            self.tables
                .snapshots
                .get(&account)
                .and_then(|entries| entries.last().cloned())
        }))
    }

    async fn transactions_after(
        &mut self,
        account: AccountId,
        after: TransactionId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut entries: Vec<Transaction> = self
            .tables
            .transactions
            .get(&account)
            .map(|committed| committed.iter().filter(|tx| tx.id > after).cloned().collect())
            .unwrap_or_default();
        entries.extend(
            self.pending
                .transactions
                .iter()
                .filter(|tx| tx.account_id == account && tx.id > after)
                .cloned(),
        );
        entries.sort_by_key(|tx| tx.id);
        Ok(entries)
    }

    async fn insert_transfer(
        &mut self,
        source: AccountId,
        destination: AccountId,
    ) -> Result<Transfer, StoreError> {
        if source == destination {
            return Err(StoreError::Integrity(format!(
                "transfer source and destination are both account {}",
                source
            )));
        }
        for id in [source, destination] {
            if self.find_account(id).is_none() {
                return Err(StoreError::foreign_key_violation(
                    "insert_transfer",
                    format!("account {} does not exist", id),
                ));
            }
        }
        let transfer = Transfer {
            id: Tables::next_id(&self.tables.transfer_seq),
            source_account_id: source,
            destination_account_id: destination,
            created_at: Utc::now(),
        };
        self.pending.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn insert_transaction(
        &mut self,
        entry: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        if entry.amount <= Decimal::ZERO {
            return Err(StoreError::Integrity(format!(
                "transaction amount must be positive, got {}",
                entry.amount
            )));
        }
        self.acquire(entry.account_id, "insert_transaction").await?;
        if self.find_account(entry.account_id).is_none() {
            return Err(StoreError::foreign_key_violation(
                "insert_transaction",
                format!("account {} does not exist", entry.account_id),
            ));
        }
        if let Some(transfer_id) = entry.transfer_id {
            if !self.transfer_exists(transfer_id) {
                return Err(StoreError::foreign_key_violation(
                    "insert_transaction",
                    format!("transfer {} does not exist", transfer_id),
                ));
            }
        }
        let tx = Transaction {
            id: Tables::next_id(&self.tables.transaction_seq),
            account_id: entry.account_id,
            transfer_id: entry.transfer_id,
            amount: entry.amount,
            direction: entry.direction,
            created_at: Utc::now(),
        };
        self.pending.transactions.push(tx.clone());
        Ok(tx)
    }

    async fn insert_snapshot(
        &mut self,
        account: AccountId,
        balance: Decimal,
        last_transaction_id: TransactionId,
    ) -> Result<BalanceSnapshot, StoreError> {
        self.acquire(account, "insert_snapshot").await?;
        let snapshot = BalanceSnapshot {
            id: Tables::next_id(&self.tables.snapshot_seq),
            account_id: account,
            balance,
            last_transaction_id,
            created_at: Utc::now(),
        };
        self.pending.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut self.pending);
        let tables = &self.tables;
        {
            let _gate = tables
                .commit_gate
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for account in pending.accounts {
                tables.accounts.insert(account.id, account);
            }
            for transfer in pending.transfers {
                tables.transfers.insert(transfer.id, transfer);
            }
            for tx in pending.transactions {
                tables.transactions.entry(tx.account_id).or_default().push(tx);
            }
            for snapshot in pending.snapshots {
                tables
                    .snapshots
                    .entry(snapshot.account_id)
                    .or_default()
                    .push(snapshot);
            }
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl Drop for InMemoryUnit {
    fn drop(&mut self) {
        let tables = Arc::clone(&self.tables);
        for (id, guard) in self.held.drain() {
            drop(guard);
            // The map's own reference is the last one: no holder, no waiter
            tables.row_locks.remove_if(&id, |_, lock| {
                Arc::strong_count(lock) == 1 && !tables.accounts.contains_key(&id)
            });
        }
    }
}
