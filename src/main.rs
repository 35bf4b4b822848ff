//! Ledger CLI
//!
//! Command-line front-end over the ledger engine.
//!
//! # Usage
//!
//! ```bash
//! ledger create-account 100 500.00
//! ledger transfer 100 200 120.25
//! ledger balance 100
//! ledger reconcile 100
//! ledger replay operations.csv --mode concurrent > outcomes.csv
//! ledger --store postgres --database-url postgres://localhost/ledger migrate
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error; the user-safe message is printed to stderr and internal details
//!   are logged

use anyhow::{bail, Context};
use ledger_engine::cli::{self, Command};
use ledger_engine::config::{LedgerConfig, StoreKind};
use ledger_engine::io::write_outcomes_csv;
use ledger_engine::replay;
use ledger_engine::telemetry::{self, LogFormat};
use ledger_engine::{
    ErrorKind, InMemoryLedgerStore, LedgerEngine, LedgerError, LedgerStore, PostgresLedgerStore,
    StoreError,
};
use std::process;
use std::sync::Arc;

fn main() {
    telemetry::init(LogFormat::from_env());
    let args = cli::parse_args();
    let config = args.global.to_ledger_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config, args.command)) {
        let internal = e
            .downcast_ref::<LedgerError>()
            .map_or(true, |ledger_error| ledger_error.kind() == ErrorKind::Internal);
        if internal {
            tracing::error!(error = ?e, "command failed");
        }
        eprintln!("Error: {}", user_facing_message(&e));
        process::exit(1);
    }
}

/// Text shown on stderr: ledger errors only ever show their user-safe message
fn user_facing_message(e: &anyhow::Error) -> String {
    match e.downcast_ref::<LedgerError>() {
        Some(ledger_error) => ledger_error.user_message(),
        None => format!("{:#}", e),
    }
}

/// Store failures outside the engine are `Internal` like any other
fn store_step<T>(result: Result<T, StoreError>, context: &'static str) -> anyhow::Result<T> {
    result.map_err(LedgerError::from).context(context)
}

async fn run(config: LedgerConfig, command: Command) -> anyhow::Result<()> {
    match config.store {
        StoreKind::Memory => {
            if matches!(command, Command::Migrate) {
                bail!("migrate requires --store postgres");
            }
            let store = InMemoryLedgerStore::new().with_lock_timeout(config.lock_timeout);
            execute(LedgerEngine::new(Arc::new(store), config.engine), command).await
        }
        StoreKind::Postgres => {
            if config.database.url.is_none() {
                bail!("--store postgres requires --database-url or DATABASE_URL");
            }
            let store = store_step(
                PostgresLedgerStore::connect(&config.database, config.lock_timeout).await,
                "failed to connect to postgres",
            )?;
            if matches!(command, Command::Migrate) {
                store_step(store.migrate().await, "failed to apply ledger schema")?;
                println!("schema applied");
                return Ok(());
            }
            execute(LedgerEngine::new(Arc::new(store), config.engine), command).await
        }
    }
}

async fn execute<S: LedgerStore>(engine: LedgerEngine<S>, command: Command) -> anyhow::Result<()> {
    let replay_config = command.to_replay_config();
    match command {
        Command::CreateAccount {
            account_id,
            initial_balance,
        } => {
            let account = engine.create_account(account_id, initial_balance).await?;
            println!("account {} created", account.id);
        }
        Command::Balance { account_id } => {
            println!("{}", engine.get_balance(account_id).await?);
        }
        Command::Transfer {
            source,
            destination,
            amount,
        } => {
            let outcome = engine
                .create_transfer_funds(source, destination, amount)
                .await?;
            println!("transfer {}: {}", outcome.transfer_id, outcome.message);
        }
        Command::Reconcile { account_id } => {
            let reconciliation = engine.reconcile(account_id).await?;
            println!(
                "snapshot_assisted={} from_scratch={} last_transaction_id={} consistent={}",
                reconciliation.snapshot_assisted,
                reconciliation.from_scratch,
                reconciliation.last_transaction_id,
                reconciliation.is_consistent()
            );
            if !reconciliation.is_consistent() {
                bail!("account {} is inconsistent", account_id);
            }
        }
        Command::Replay { input, .. } => {
            let replay_config = replay_config.unwrap_or_default();
            let outcomes = replay::replay_file(&engine, &input, &replay_config).await?;
            let mut output = std::io::stdout();
            write_outcomes_csv(&outcomes, &mut output).map_err(anyhow::Error::msg)?;
        }
        Command::Migrate => bail!("migrate requires --store postgres"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_engine::types::OPAQUE_INTERNAL_MESSAGE;

    #[test]
    fn test_store_failures_show_only_the_opaque_message() {
        let failure: Result<(), StoreError> = Err(StoreError::Unavailable {
            operation: "connect".to_string(),
            message: "password authentication failed for user \"ledger\"".to_string(),
        });
        let err = store_step(failure, "failed to connect to postgres").unwrap_err();
        assert_eq!(user_facing_message(&err), OPAQUE_INTERNAL_MESSAGE);
    }

    #[test]
    fn test_ledger_errors_show_their_user_message() {
        let err = anyhow::Error::from(LedgerError::not_found("source account does not exist"));
        assert_eq!(
            user_facing_message(&err),
            LedgerError::not_found("source account does not exist").user_message()
        );
    }

    #[test]
    fn test_usage_errors_keep_their_detail() {
        let err = anyhow::anyhow!("migrate requires --store postgres");
        assert_eq!(user_facing_message(&err), "migrate requires --store postgres");
    }
}
