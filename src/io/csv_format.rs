//! CSV format handling for replay operations and outcomes
//!
//! This module centralizes all CSV format concerns, providing:
//! - OperationRecord structure for deserialization
//! - Conversion from CSV records to [`Operation`]s
//! - Outcome serialization
//!
//! All functions are pure (no I/O) for easy testing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::str::FromStr;

use crate::types::{AccountId, TransferId};

/// CSV record structure for deserialization
///
/// Matches the input CSV format with columns: op, account, destination, amount.
/// Columns an operation does not use are left empty.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OperationRecord {
    pub op: String,
    pub account: Option<String>,
    pub destination: Option<String>,
    pub amount: Option<String>,
}

/// One engine call described by a CSV row
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create {
        account: AccountId,
        initial_balance: Decimal,
    },
    Transfer {
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    },
    Balance {
        account: AccountId,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::Transfer { .. } => "transfer",
            Operation::Balance { .. } => "balance",
        }
    }
}

/// Convert an OperationRecord to an Operation
///
/// The op name is case-insensitive. Only the shape of the row is checked here;
/// business rules (zero ids, non-positive amounts) are left to the engine so
/// they surface with their usual error kinds.
///
/// # Returns
///
/// * `Ok(Operation)` - Successfully converted record
/// * `Err(String)` - Message describing why the row is malformed
pub fn convert_operation_record(record: &OperationRecord) -> Result<Operation, String> {
    match record.op.trim().to_lowercase().as_str() {
        "create" => Ok(Operation::Create {
            account: required_id("account", &record.account)?,
            initial_balance: required_amount(&record.amount)?,
        }),
        "transfer" => Ok(Operation::Transfer {
            source: required_id("account", &record.account)?,
            destination: required_id("destination", &record.destination)?,
            amount: required_amount(&record.amount)?,
        }),
        "balance" => Ok(Operation::Balance {
            account: required_id("account", &record.account)?,
        }),
        _ => Err(format!("Invalid operation: '{}'", record.op)),
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required_id(column: &str, field: &Option<String>) -> Result<AccountId, String> {
    let value = present(field).ok_or_else(|| format!("Missing {} column", column))?;
    value
        .parse::<AccountId>()
        .map_err(|_| format!("Invalid {} '{}'", column, value))
}

fn required_amount(field: &Option<String>) -> Result<Decimal, String> {
    let value = present(field).ok_or_else(|| "Missing amount column".to_string())?;
    Decimal::from_str(value).map_err(|_| format!("Invalid amount '{}'", value))
}

/// Outcome of one replayed row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeRecord {
    /// Line of the row in the input file (the header is line 1)
    pub line: u64,
    pub op: String,
    /// `ok`, the error kind, or `invalid` for malformed rows
    pub status: String,
    pub transfer_id: Option<TransferId>,
    pub balance: Option<Decimal>,
    pub error: Option<String>,
}

pub const STATUS_OK: &str = "ok";
pub const STATUS_INVALID: &str = "invalid";

/// Write outcomes in CSV format
///
/// Columns: line, op, status, transfer_id, balance, error. Rows are sorted by
/// input line for deterministic output.
pub fn write_outcomes_csv(outcomes: &[OutcomeRecord], output: &mut dyn Write) -> Result<(), String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(output);

    writer
        .write_record(["line", "op", "status", "transfer_id", "balance", "error"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted = outcomes.to_vec();
    sorted.sort_by_key(|outcome| outcome.line);

    for outcome in sorted {
        writer
            .serialize(&outcome)
            .map_err(|e| format!("Failed to write outcome record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}
