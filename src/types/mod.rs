//! Types module
//!
//! Contains the ledger's data model and error taxonomy:
//! - `account`: Account identity and the create-account request
//! - `transaction`: Append-only ledger entries and their direction
//! - `transfer`: Transfers, transfer requests and outcomes
//! - `snapshot`: Cached balance checkpoints
//! - `money`: Input-boundary validation for ids and amounts
//! - `error`: Error types for the ledger engine

pub mod account;
pub mod error;
pub mod money;
pub mod snapshot;
pub mod transaction;
pub mod transfer;

pub use account::{Account, AccountId, CreateAccount};
pub use error::{ErrorKind, LedgerError, OPAQUE_INTERNAL_MESSAGE};
pub use money::MAX_FRACTIONAL_DIGITS;
pub use snapshot::{BalanceSnapshot, SnapshotId};
pub use transaction::{Direction, NewTransaction, Transaction, TransactionId};
pub use transfer::{Transfer, TransferId, TransferOutcome, TransferRequest};
