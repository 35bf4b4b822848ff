//! Runtime configuration
//!
//! Everything the binary needs to wire an engine: which store to use, how the
//! Postgres pool is bounded, how transfers execute, and when balance snapshots
//! are refreshed. Values come from the CLI (with environment fallbacks, see
//! [`crate::cli`]); invalid zero values fall back to defaults with a warning.

use clap::ValueEnum;
use std::time::Duration;
use tracing::warn;

/// Which [`crate::store::LedgerStore`] backs the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Memory,
    Postgres,
}

/// How the transfer executor performs steps 1-8 of a transfer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TransferMode {
    /// Application-level unit of work issuing individual statements
    #[default]
    InProcess,

    /// Server-side routine returning a packed result record
    StoredProcedure,
}

/// When a balance read writes a fresh snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Minimum number of transactions folded past the latest snapshot before
    /// a new one is written; 0 disables snapshot refresh
    pub interval: usize,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self { interval: 50 }
    }
}

impl SnapshotPolicy {
    pub fn disabled() -> Self {
        Self { interval: 0 }
    }

    pub fn every(interval: usize) -> Self {
        Self { interval }
    }

    pub fn should_snapshot(&self, folded: usize) -> bool {
        self.interval > 0 && folded >= self.interval
    }
}

/// Engine behaviour shared by every operation component
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineOptions {
    pub transfer_mode: TransferMode,
    pub snapshot_policy: SnapshotPolicy,
}

/// Postgres connection settings
///
/// The pool is the only resource shared between requests, so it is always
/// bounded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 50,
            min_connections: 0,
            idle_timeout: Duration::from_secs(5 * 60),
            max_lifetime: Duration::from_secs(60 * 60),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl DatabaseConfig {
    /// Build a pool configuration, replacing invalid zero values by defaults
    pub fn new(
        url: Option<String>,
        max_connections: u32,
        min_connections: u32,
        idle_timeout: Duration,
        max_lifetime: Duration,
        acquire_timeout: Duration,
    ) -> Self {
        let default = Self::default();

        let max_connections = if max_connections == 0 {
            warn!(
                default = default.max_connections,
                "invalid max_connections (0), using default"
            );
            default.max_connections
        } else {
            max_connections
        };

        let min_connections = if min_connections > max_connections {
            warn!(
                min_connections,
                max_connections, "min_connections exceeds max_connections, clamping"
            );
            max_connections
        } else {
            min_connections
        };

        let acquire_timeout = if acquire_timeout.is_zero() {
            warn!(
                default_secs = default.acquire_timeout.as_secs(),
                "invalid acquire_timeout (0), using default"
            );
            default.acquire_timeout
        } else {
            acquire_timeout
        };

        Self {
            url,
            max_connections,
            min_connections,
            idle_timeout,
            max_lifetime,
            acquire_timeout,
        }
    }
}

/// Complete wiring configuration for the `ledger` binary
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    pub store: StoreKind,
    pub database: DatabaseConfig,
    pub engine: EngineOptions,
    /// Bound on every row-lock wait
    pub lock_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            database: DatabaseConfig::default(),
            engine: EngineOptions::default(),
            lock_timeout: Duration::from_secs(5),
        }
    }
}
