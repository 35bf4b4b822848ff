//! Atomic transfer of funds between two accounts
//!
//! A transfer runs in a single unit of work:
//!
//! ```text
//! Requested -> Validating -> Locking -> Applying -> Committed
//!                  |            |          |
//!                  v            v          v
//!              Rejected      Aborted    Aborted
//! ```
//!
//! Validation happens before any row is touched. Both account rows are then
//! locked in ascending id order, so two transfers in opposite directions
//! between the same accounts cannot deadlock. The source balance is computed
//! under the held lock, which serializes every transfer from the same source.
//!
//! The step function [`apply_transfer`] is shared by the in-process mode and by
//! the in-memory emulation of the server-side procedure; either way the
//! outcome goes through [`codec::classify`] so both modes report the same
//! error kinds.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::codec;
use crate::config::TransferMode;
use crate::store::{LedgerStore, StoreError, UnitOfWork};
use crate::types::{
    money, AccountId, LedgerError, NewTransaction, TransferOutcome, TransferRequest,
    MAX_FRACTIONAL_DIGITS,
};

use super::balance::compute_balance;
use super::unit;

pub const SOURCE_NOT_FOUND: &str = "source account does not exist";
pub const DESTINATION_NOT_FOUND: &str = "destination account does not exist";
pub const INSUFFICIENT_FUNDS: &str = "insufficient funds";
pub const NON_POSITIVE_AMOUNT: &str = "transfer amount must be positive";
pub const SAME_ACCOUNT: &str = "cannot transfer to the same account";

/// Account ids in the order their rows must be locked
pub fn lock_order(source: AccountId, destination: AccountId) -> [AccountId; 2] {
    if source <= destination {
        [source, destination]
    } else {
        [destination, source]
    }
}

/// Outcome of the steps plus the source balance, when it was computed
struct Applied {
    outcome: TransferOutcome,
    source_balance: Option<Decimal>,
}

impl Applied {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            outcome: TransferOutcome::rejected(message),
            source_balance: None,
        }
    }
}

/// Run the locking and applying steps of a transfer inside `unit`
///
/// Business rejections come back as an unsuccessful [`TransferOutcome`]; only
/// store failures are errors. The caller decides whether to commit: the unit
/// holds writes only when the outcome is successful.
pub async fn apply_transfer<U: UnitOfWork>(
    unit: &mut U,
    request: &TransferRequest,
) -> Result<TransferOutcome, StoreError> {
    apply_steps(unit, request).await.map(|applied| applied.outcome)
}

async fn apply_steps<U: UnitOfWork>(
    unit: &mut U,
    request: &TransferRequest,
) -> Result<Applied, StoreError> {
    let TransferRequest {
        source,
        destination,
        amount,
    } = *request;

    if amount <= Decimal::ZERO {
        return Ok(Applied::rejected(NON_POSITIVE_AMOUNT));
    }
    if source == destination {
        return Ok(Applied::rejected(SAME_ACCOUNT));
    }
    if money::fractional_digits(amount) > MAX_FRACTIONAL_DIGITS {
        return Ok(Applied::rejected(format!(
            "amount has too many decimal places (max {})",
            MAX_FRACTIONAL_DIGITS
        )));
    }

    let [first, second] = lock_order(source, destination);
    let first_row = unit.lock_account(first).await?;
    let second_row = unit.lock_account(second).await?;
    let (source_row, destination_row) = if first == source {
        (first_row, second_row)
    } else {
        (second_row, first_row)
    };
    if source_row.is_none() {
        return Ok(Applied::rejected(SOURCE_NOT_FOUND));
    }
    if destination_row.is_none() {
        return Ok(Applied::rejected(DESTINATION_NOT_FOUND));
    }

    let balance = compute_balance(unit, source).await?.balance;
    if balance < amount {
        return Ok(Applied {
            outcome: TransferOutcome::rejected(INSUFFICIENT_FUNDS),
            source_balance: Some(balance),
        });
    }

    let transfer = unit.insert_transfer(source, destination).await?;
    unit.insert_transaction(NewTransaction::debit(source, transfer.id, amount))
        .await?;
    unit.insert_transaction(NewTransaction::credit(destination, Some(transfer.id), amount))
        .await?;

    Ok(Applied {
        outcome: TransferOutcome::completed(transfer.id),
        source_balance: Some(balance),
    })
}

/// CreateTransferFunds operation
#[derive(Debug)]
pub struct TransferExecutor<S> {
    store: Arc<S>,
    mode: TransferMode,
    cancel: CancellationToken,
}

impl<S> Clone for TransferExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            mode: self.mode,
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: LedgerStore> TransferExecutor<S> {
    pub fn new(store: Arc<S>, mode: TransferMode) -> Self {
        Self {
            store,
            mode,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Move `amount` from `source` to `destination` atomically
    ///
    /// # Errors
    ///
    /// * `Validation` - malformed request, every violation reported
    /// * `NotFound` - source or destination account missing
    /// * `InsufficientFunds` - source balance below `amount`
    /// * `TransferFailed` - store-side rejection with unrecognised text
    /// * `Internal` - store failure, undecodable result, or cancellation
    #[instrument(skip(self), fields(mode = ?self.mode))]
    pub async fn create_transfer_funds(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<TransferOutcome, LedgerError> {
        let request = TransferRequest::new(source, destination, amount);
        request.validate()?;

        let result = match self.mode {
            TransferMode::InProcess => self.run_in_process(&request).await,
            TransferMode::StoredProcedure => self.run_procedure(&request).await,
        };

        match &result {
            Ok(outcome) => info!(transfer_id = outcome.transfer_id, "transfer committed"),
            Err(err) => debug!(kind = %err.kind(), error = %err, "transfer rejected"),
        }
        result
    }

    async fn run_in_process(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, LedgerError> {
        const OPERATION: &str = "create_transfer_funds";

        let mut unit = unit::begin(&*self.store, &self.cancel, OPERATION).await?;
        let applied = match apply_steps(&mut unit, request).await {
            Ok(applied) => applied,
            Err(err) => {
                unit::abort(unit, OPERATION).await;
                return Err(unit::store_failure(OPERATION, err));
            }
        };

        if applied.outcome.success {
            unit::commit(unit, &self.cancel, OPERATION).await?;
        } else {
            unit::abort(unit, OPERATION).await;
        }

        codec::classify(applied.outcome, request).map_err(|err| match err {
            LedgerError::InsufficientFunds {
                account, requested, ..
            } => LedgerError::insufficient_funds(account, requested, applied.source_balance),
            other => other,
        })
    }

    async fn run_procedure(&self, request: &TransferRequest) -> Result<TransferOutcome, LedgerError> {
        const OPERATION: &str = "transfer_procedure";

        unit::ensure_active(&self.cancel, OPERATION)?;
        let packed = self
            .store
            .transfer_procedure(request.source, request.destination, request.amount)
            .await
            .map_err(|err| unit::store_failure(OPERATION, err))?;
        debug!(%packed, "transfer procedure returned");

        let outcome = codec::decode(&packed)?;
        codec::classify(outcome, request)
    }
}
