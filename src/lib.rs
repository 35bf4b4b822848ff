//! Ledger Engine Library
//! # Overview
//!
//! A double-entry money-movement ledger. Balances are never stored: every
//! account owns an append-only sequence of CREDIT/DEBIT transactions, and its
//! balance is the latest snapshot plus the signed sum of the entries after it.
//! Transfers move funds between two accounts atomically and never leave a
//! negative balance, create money, or move funds to the same account.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Data model (Account, Transaction, Transfer, BalanceSnapshot) and errors
//! - [`store`] - The [`store::LedgerStore`] / [`store::UnitOfWork`] seam with
//!   in-memory and Postgres implementations
//! - [`core`] - Business logic components:
//!   - [`core::account`] - Account creation with its opening credit
//!   - [`core::balance`] - Snapshot-assisted balance calculation
//!   - [`core::transfer`] - The atomic transfer state machine
//!   - [`core::engine`] - Facade over all operations
//! - [`codec`] - Packed `(transfer_id,success,message)` result records
//! - [`config`] - Store, pool, transfer mode and snapshot settings
//! - [`io`] / [`replay`] - CSV replay of operation files
//! - [`cli`] / [`telemetry`] - Binary wiring
//!
//! # Operations
//!
//! - **CreateAccount**: open an account funded by an opening CREDIT
//! - **GetBalance**: derive the current balance under the account's row lock
//! - **CreateTransferFunds**: lock both accounts in ascending id order, check
//!   the source balance, then write the transfer and its DEBIT/CREDIT pair
//! - **Reconcile**: compare the snapshot-assisted balance with a full fold
//!
//! # Example
//!
//! ```no_run
//! use ledger_engine::{EngineOptions, InMemoryLedgerStore, LedgerEngine};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), ledger_engine::LedgerError> {
//! let engine = LedgerEngine::new(Arc::new(InMemoryLedgerStore::new()), EngineOptions::default());
//! engine.create_account(100, Decimal::new(50000, 2)).await?;
//! engine.create_account(200, Decimal::new(1, 0)).await?;
//! let outcome = engine.create_transfer_funds(100, 200, Decimal::new(12025, 2)).await?;
//! assert!(outcome.success);
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod cli;
pub mod codec;
pub mod config;
pub mod core;
pub mod io;
pub mod replay;
pub mod store;
pub mod telemetry;
pub mod types;

pub use config::{EngineOptions, LedgerConfig, SnapshotPolicy, StoreKind, TransferMode};
pub use core::{LedgerEngine, Reconciliation};
pub use store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError, UnitOfWork};
pub use types::{
    Account, AccountId, ErrorKind, LedgerError, Transaction, TransactionId, Transfer, TransferId,
    TransferOutcome,
};
