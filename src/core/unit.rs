//! Unit-of-work lifecycle shared by the engine components
//!
//! Opening, committing and aborting a unit of work all go through here so the
//! cancellation policy and the logging of store failures are identical for
//! every operation.

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::store::{LedgerStore, StoreError, UnitOfWork};
use crate::types::LedgerError;

const CANCELLED: &str = "operation cancelled";

/// Fail fast if the caller has already given up
pub(crate) fn ensure_active(cancel: &CancellationToken, operation: &str) -> Result<(), LedgerError> {
    if cancel.is_cancelled() {
        warn!(operation, "cancelled before the unit of work was opened");
        return Err(LedgerError::internal(CANCELLED));
    }
    Ok(())
}

/// Map a store failure to `Internal`, logging its full context
pub(crate) fn store_failure(operation: &str, err: StoreError) -> LedgerError {
    error!(operation, error = %err, "store operation failed");
    LedgerError::from(err)
}

pub(crate) async fn begin<S: LedgerStore>(
    store: &S,
    cancel: &CancellationToken,
    operation: &str,
) -> Result<S::Unit, LedgerError> {
    ensure_active(cancel, operation)?;
    store
        .begin()
        .await
        .map_err(|err| store_failure(operation, err))
}

/// Commit, unless cancellation was observed while the unit was in flight
pub(crate) async fn commit<U: UnitOfWork>(
    unit: U,
    cancel: &CancellationToken,
    operation: &str,
) -> Result<(), LedgerError> {
    if cancel.is_cancelled() {
        warn!(operation, "cancelled before commit, rolling back");
        abort(unit, operation).await;
        return Err(LedgerError::internal(CANCELLED));
    }
    unit.commit()
        .await
        .map_err(|err| store_failure(operation, err))
}

/// Roll back; a failed rollback is only logged since the unit is gone anyway
pub(crate) async fn abort<U: UnitOfWork>(unit: U, operation: &str) {
    if let Err(err) = unit.rollback().await {
        error!(operation, error = %err, "rollback failed");
    }
}
