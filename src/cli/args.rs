use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    DatabaseConfig, EngineOptions, LedgerConfig, SnapshotPolicy, StoreKind, TransferMode,
};
use crate::replay::{ReplayConfig, ReplayMode};
use crate::types::AccountId;

/// Double-entry ledger: accounts, balances and atomic transfers
#[derive(Parser, Debug)]
#[command(name = "ledger")]
#[command(about = "Double-entry ledger: accounts, balances and atomic transfers", long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command; each one can also come from the environment
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Storage backend
    #[arg(long, env = "LEDGER_STORE", value_enum, default_value = "memory", global = true)]
    pub store: StoreKind,

    /// Postgres connection string (postgres store only)
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Maximum pooled connections
    #[arg(long, env = "LEDGER_DB_MAX_CONNECTIONS", default_value_t = 50, global = true)]
    pub max_connections: u32,

    /// Connections kept open while idle
    #[arg(long, env = "LEDGER_DB_MIN_CONNECTIONS", default_value_t = 0, global = true)]
    pub min_connections: u32,

    /// Seconds before an idle connection is closed
    #[arg(long, env = "LEDGER_DB_IDLE_TIMEOUT_SECS", default_value_t = 300, global = true)]
    pub idle_timeout_secs: u64,

    /// Maximum lifetime of a pooled connection in seconds
    #[arg(long, env = "LEDGER_DB_MAX_LIFETIME_SECS", default_value_t = 3600, global = true)]
    pub max_lifetime_secs: u64,

    /// Seconds to wait for a free connection
    #[arg(long, env = "LEDGER_DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 30, global = true)]
    pub acquire_timeout_secs: u64,

    /// Bound on every row-lock wait, in milliseconds
    #[arg(long, env = "LEDGER_LOCK_TIMEOUT_MS", default_value_t = 5000, global = true)]
    pub lock_timeout_ms: u64,

    /// How transfers are executed
    #[arg(
        long,
        env = "LEDGER_TRANSFER_MODE",
        value_enum,
        default_value = "in-process",
        global = true
    )]
    pub transfer_mode: TransferMode,

    /// Transactions folded past the latest snapshot before a new one is written (0 disables)
    #[arg(long, env = "LEDGER_SNAPSHOT_INTERVAL", default_value_t = 50, global = true)]
    pub snapshot_interval: usize,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Open an account with its initial balance
    CreateAccount {
        #[arg(value_name = "ID")]
        account_id: AccountId,
        #[arg(value_name = "INITIAL_BALANCE", allow_negative_numbers = true)]
        initial_balance: Decimal,
    },

    /// Print the current balance of an account
    Balance {
        #[arg(value_name = "ID")]
        account_id: AccountId,
    },

    /// Move funds between two accounts
    Transfer {
        #[arg(value_name = "SOURCE")]
        source: AccountId,
        #[arg(value_name = "DESTINATION")]
        destination: AccountId,
        #[arg(value_name = "AMOUNT", allow_negative_numbers = true)]
        amount: Decimal,
    },

    /// Compare the snapshot-assisted balance with a full fold of the ledger
    Reconcile {
        #[arg(value_name = "ID")]
        account_id: AccountId,
    },

    /// Run every operation of a CSV file and print one outcome row per line
    Replay {
        #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
        input: PathBuf,

        #[arg(long, value_enum, default_value = "sequential")]
        mode: ReplayMode,

        /// Maximum operations in flight in concurrent mode (default: CPU cores)
        #[arg(long = "max-concurrent", value_name = "COUNT")]
        max_concurrent: Option<usize>,
    },

    /// Create the ledger schema (postgres store only)
    Migrate,
}

impl GlobalArgs {
    /// Build the wiring configuration, falling back to defaults for invalid values
    pub fn to_ledger_config(&self) -> LedgerConfig {
        let database = DatabaseConfig::new(
            self.database_url.clone(),
            self.max_connections,
            self.min_connections,
            Duration::from_secs(self.idle_timeout_secs),
            Duration::from_secs(self.max_lifetime_secs),
            Duration::from_secs(self.acquire_timeout_secs),
        );

        let lock_timeout = if self.lock_timeout_ms == 0 {
            let default = LedgerConfig::default().lock_timeout;
            tracing::warn!(
                default_ms = default.as_millis() as u64,
                "invalid lock_timeout_ms (0), using default"
            );
            default
        } else {
            Duration::from_millis(self.lock_timeout_ms)
        };

        LedgerConfig {
            store: self.store,
            database,
            engine: EngineOptions {
                transfer_mode: self.transfer_mode,
                snapshot_policy: SnapshotPolicy::every(self.snapshot_interval),
            },
            lock_timeout,
        }
    }
}

impl Command {
    /// Replay configuration for the `replay` command
    pub fn to_replay_config(&self) -> Option<ReplayConfig> {
        match self {
            Command::Replay {
                mode,
                max_concurrent,
                ..
            } => Some(match max_concurrent {
                Some(n) => ReplayConfig::new(*mode, *n),
                None => ReplayConfig {
                    mode: *mode,
                    ..ReplayConfig::default()
                },
            }),
            _ => None,
        }
    }
}
