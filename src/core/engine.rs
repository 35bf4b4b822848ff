//! Ledger engine facade
//!
//! `LedgerEngine` bundles the three operation components over one shared store.
//!
//! # Architecture
//!
//! ```text
//! LedgerEngine<S>
//!     ├── AccountLifecycle<S>   (create_account)
//!     ├── BalanceCalculator<S>  (get_balance, reconcile)
//!     └── TransferExecutor<S>   (create_transfer_funds)
//!             all over Arc<S: LedgerStore>
//! ```
//!
//! # Thread Safety
//!
//! The engine is a plain value: cloning it clones an `Arc` and a cancellation
//! token. Each call opens its own unit of work, so clones can be moved into as
//! many tasks as needed.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineOptions;
use crate::store::LedgerStore;
use crate::types::{Account, AccountId, LedgerError, TransferOutcome};

use super::{AccountLifecycle, BalanceCalculator, Reconciliation, TransferExecutor};

#[derive(Debug)]
pub struct LedgerEngine<S> {
    store: Arc<S>,
    accounts: AccountLifecycle<S>,
    balances: BalanceCalculator<S>,
    transfers: TransferExecutor<S>,
}

impl<S> Clone for LedgerEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            accounts: self.accounts.clone(),
            balances: self.balances.clone(),
            transfers: self.transfers.clone(),
        }
    }
}

impl<S: LedgerStore> LedgerEngine<S> {
    pub fn new(store: Arc<S>, options: EngineOptions) -> Self {
        Self {
            accounts: AccountLifecycle::new(Arc::clone(&store)),
            balances: BalanceCalculator::new(Arc::clone(&store), options.snapshot_policy),
            transfers: TransferExecutor::new(Arc::clone(&store), options.transfer_mode),
            store,
        }
    }

    /// Bind every operation of this engine to `cancel`
    ///
    /// A cancelled token makes new requests fail fast with an `Internal` error
    /// and rolls back units of work that have not committed yet.
    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        Self {
            store: self.store,
            accounts: self.accounts.with_cancellation(cancel.clone()),
            balances: self.balances.with_cancellation(cancel.clone()),
            transfers: self.transfers.with_cancellation(cancel),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn create_account(
        &self,
        account_id: AccountId,
        initial_balance: Decimal,
    ) -> Result<Account, LedgerError> {
        self.accounts
            .create_account(account_id, initial_balance)
            .await
    }

    pub async fn get_balance(&self, account_id: AccountId) -> Result<Decimal, LedgerError> {
        self.balances.get_balance(account_id).await
    }

    pub async fn create_transfer_funds(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<TransferOutcome, LedgerError> {
        self.transfers
            .create_transfer_funds(source, destination, amount)
            .await
    }

    pub async fn reconcile(&self, account_id: AccountId) -> Result<Reconciliation, LedgerError> {
        self.balances.reconcile(account_id).await
    }
}
