//! Replay of CSV operation files through the engine
//!
//! Every data row becomes one engine call and one [`OutcomeRecord`]. Rows that
//! cannot be parsed are reported as `invalid` and never reach the store.
//!
//! # Modes
//!
//! - **sequential**: rows run one after another in file order, so the output is
//!   fully deterministic
//! - **concurrent**: each row runs on its own tokio task, at most
//!   `max_concurrent` at a time. Rows race exactly like independent requests
//!   would; the ledger invariants still hold, but the interleaving (and thus
//!   individual outcomes) may differ between runs
//!
//! In both modes outcomes are returned ordered by input line.

use clap::ValueEnum;
use futures::stream::{self, StreamExt};
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::core::LedgerEngine;
use crate::io::{Operation, OperationReader, OutcomeRecord, ParsedRow, STATUS_INVALID, STATUS_OK};
use crate::store::LedgerStore;
use crate::types::LedgerError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ReplayMode {
    #[default]
    Sequential,
    Concurrent,
}

/// Configuration for a replay run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayConfig {
    pub mode: ReplayMode,
    /// Maximum number of rows in flight in concurrent mode
    pub max_concurrent: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            mode: ReplayMode::default(),
            max_concurrent: num_cpus::get(),
        }
    }
}

impl ReplayConfig {
    /// Create a config, replacing a zero `max_concurrent` with the default
    pub fn new(mode: ReplayMode, max_concurrent: usize) -> Self {
        let max_concurrent = if max_concurrent == 0 {
            let default = Self::default().max_concurrent;
            tracing::warn!(default, "invalid max_concurrent (0), using default");
            default
        } else {
            max_concurrent
        };
        Self {
            mode,
            max_concurrent,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read replay input: {0}")]
    Input(String),
}

/// Replay every row of `input` and return the outcomes ordered by line
#[instrument(skip(engine, config), fields(mode = ?config.mode))]
pub async fn replay_file<S: LedgerStore>(
    engine: &LedgerEngine<S>,
    input: &Path,
    config: &ReplayConfig,
) -> Result<Vec<OutcomeRecord>, ReplayError> {
    let rows: Vec<ParsedRow> = OperationReader::new(input)
        .map_err(ReplayError::Input)?
        .collect();
    let outcomes = replay_rows(engine, rows, config).await;
    info!(rows = outcomes.len(), "replay finished");
    Ok(outcomes)
}

/// Replay already-parsed rows
pub async fn replay_rows<S: LedgerStore>(
    engine: &LedgerEngine<S>,
    rows: Vec<ParsedRow>,
    config: &ReplayConfig,
) -> Vec<OutcomeRecord> {
    let mut outcomes = match config.mode {
        ReplayMode::Sequential => {
            let mut outcomes = Vec::with_capacity(rows.len());
            for row in rows {
                outcomes.push(execute(engine, row).await);
            }
            outcomes
        }
        ReplayMode::Concurrent => {
            stream::iter(rows)
                .map(|row| {
                    let engine = engine.clone();
                    let line = row.line;
                    let op = row.op.clone();
                    async move {
                        match tokio::spawn(async move { execute(&engine, row).await }).await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                error!(line, error = %e, "replay task panicked");
                                failed(line, op, &LedgerError::internal("replay task panicked"))
                            }
                        }
                    }
                })
                .buffer_unordered(config.max_concurrent.max(1))
                .collect()
                .await
        }
    };
    outcomes.sort_by_key(|outcome| outcome.line);
    outcomes
}

async fn execute<S: LedgerStore>(engine: &LedgerEngine<S>, row: ParsedRow) -> OutcomeRecord {
    let ParsedRow {
        line,
        op,
        operation,
    } = row;

    let operation = match operation {
        Ok(operation) => operation,
        Err(message) => {
            return OutcomeRecord {
                line,
                op,
                status: STATUS_INVALID.to_string(),
                transfer_id: None,
                balance: None,
                error: Some(message),
            }
        }
    };

    let op = operation.name().to_string();
    let mut outcome = OutcomeRecord {
        line,
        op: op.clone(),
        status: STATUS_OK.to_string(),
        transfer_id: None,
        balance: None,
        error: None,
    };

    let result = match operation {
        Operation::Create {
            account,
            initial_balance,
        } => engine.create_account(account, initial_balance).await.map(|_| ()),
        Operation::Transfer {
            source,
            destination,
            amount,
        } => engine
            .create_transfer_funds(source, destination, amount)
            .await
            .map(|transfer| outcome.transfer_id = Some(transfer.transfer_id)),
        Operation::Balance { account } => engine
            .get_balance(account)
            .await
            .map(|balance| outcome.balance = Some(balance)),
    };

    match result {
        Ok(()) => outcome,
        Err(err) => failed(line, op, &err),
    }
}

fn failed(line: u64, op: String, err: &LedgerError) -> OutcomeRecord {
    OutcomeRecord {
        line,
        op,
        status: err.kind().as_str().to_string(),
        transfer_id: None,
        balance: None,
        error: Some(err.user_message()),
    }
}
