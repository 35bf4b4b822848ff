//! Ledger storage
//!
//! - `traits`: the [`LedgerStore`] / [`UnitOfWork`] seam the engine is written against
//! - `memory`: DashMap-backed store with per-account row locks
//! - `postgres`: sqlx-backed store and the server-side transfer routine
//! - `error`: store-layer error type

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::StoreError;
pub use memory::{InMemoryLedgerStore, InMemoryUnit, DEFAULT_LOCK_TIMEOUT};
pub use postgres::{PgUnit, PostgresLedgerStore};
pub use traits::{LedgerStore, UnitOfWork};
