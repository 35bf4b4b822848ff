//! Core business logic module
//!
//! This module contains the ledger operations:
//! - `account` - Account creation with its opening credit
//! - `balance` - Snapshot-assisted balance computation and reconciliation
//! - `transfer` - The atomic transfer state machine
//! - `engine` - Facade bundling the operations over one store
//! - `unit` - Shared unit-of-work lifecycle (cancellation, rollback, logging)

pub mod account;
pub mod balance;
pub mod engine;
pub mod transfer;
mod unit;

pub use account::AccountLifecycle;
pub use balance::{BalanceCalculator, BalanceReading, Reconciliation};
pub use engine::LedgerEngine;
pub use transfer::{apply_transfer, TransferExecutor};
