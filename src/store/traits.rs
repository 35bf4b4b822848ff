//! Store traits: the boundary between the engine and durable storage
//!
//! The engine never touches tables directly. It opens a [`UnitOfWork`] through a
//! [`LedgerStore`], issues row-locking reads and inserts against it, and then
//! either commits or rolls back. Both an in-memory and a Postgres store
//! implement these traits, so the engine's invariants hold identically on both.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{
    Account, AccountId, BalanceSnapshot, NewTransaction, Transaction, TransactionId, Transfer,
};

use super::StoreError;

/// Durable ledger storage
///
/// Implementations must be cheap to share behind an `Arc` and safe to use from
/// many tasks at once.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Unit: UnitOfWork;

    /// Open a new all-or-nothing unit of work
    async fn begin(&self) -> Result<Self::Unit, StoreError>;

    /// Run the server-side transfer routine as its own unit of work
    ///
    /// Returns the packed `(transfer_id,success,message)` record exactly as the
    /// store produced it; decoding is the caller's job.
    async fn transfer_procedure(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<String, StoreError>;
}

/// One store transaction
///
/// Row locks taken through a unit of work are held until it commits, rolls
/// back, or is dropped. Dropping without commit discards every write.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock the account row and return it, or `None` if it does not exist
    ///
    /// Locking an account the unit already holds returns immediately.
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Insert a new account row
    ///
    /// Fails with [`StoreError::UniqueViolation`] when the id is taken.
    async fn insert_account(&mut self, id: AccountId) -> Result<Account, StoreError>;

    /// Most recent snapshot of the account, locked for the rest of the unit
    async fn latest_snapshot_for_update(
        &mut self,
        account: AccountId,
    ) -> Result<Option<BalanceSnapshot>, StoreError>;

    /// Transactions of the account with id strictly greater than `after`,
    /// in ascending id order
    async fn transactions_after(
        &mut self,
        account: AccountId,
        after: TransactionId,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn insert_transfer(
        &mut self,
        source: AccountId,
        destination: AccountId,
    ) -> Result<Transfer, StoreError>;

    async fn insert_transaction(&mut self, entry: NewTransaction)
        -> Result<Transaction, StoreError>;

    async fn insert_snapshot(
        &mut self,
        account: AccountId,
        balance: Decimal,
        last_transaction_id: TransactionId,
    ) -> Result<BalanceSnapshot, StoreError>;

    /// Make every write of this unit visible atomically and release its locks
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard every write of this unit and release its locks
    async fn rollback(self) -> Result<(), StoreError>;
}
