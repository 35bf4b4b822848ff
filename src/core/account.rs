//! Account lifecycle
//!
//! An account is opened together with its opening CREDIT in one unit of work,
//! so an account never exists without the entry that funds it.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::store::{LedgerStore, StoreError, UnitOfWork};
use crate::types::{Account, AccountId, CreateAccount, LedgerError, NewTransaction};

use super::unit;

/// CreateAccount operation
#[derive(Debug)]
pub struct AccountLifecycle<S> {
    store: Arc<S>,
    cancel: CancellationToken,
}

impl<S> Clone for AccountLifecycle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: LedgerStore> AccountLifecycle<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Open an account funded with `initial_balance`
    ///
    /// # Errors
    ///
    /// * `Validation` - zero id, non-positive or over-precise balance
    /// * `Conflict` - the id is already in use
    /// * `Internal` - any other store failure; nothing is persisted
    #[instrument(skip(self))]
    pub async fn create_account(
        &self,
        account_id: AccountId,
        initial_balance: Decimal,
    ) -> Result<Account, LedgerError> {
        const OPERATION: &str = "create_account";
        let request = CreateAccount::new(account_id, initial_balance);
        request.validate()?;

        let mut unit = unit::begin(&*self.store, &self.cancel, OPERATION).await?;
        let account = match open(&mut unit, &request).await {
            Ok(account) => account,
            Err(err) => {
                unit::abort(unit, OPERATION).await;
                return Err(if err.is_unique_violation() {
                    LedgerError::conflict(account_id)
                } else {
                    unit::store_failure(OPERATION, err)
                });
            }
        };
        unit::commit(unit, &self.cancel, OPERATION).await?;

        info!(account_id, %initial_balance, "account created");
        Ok(account)
    }
}

async fn open<U: UnitOfWork>(unit: &mut U, request: &CreateAccount) -> Result<Account, StoreError> {
    let account = unit.insert_account(request.account_id).await?;
    unit.insert_transaction(NewTransaction::credit(
        request.account_id,
        None,
        request.initial_balance,
    ))
    .await?;
    Ok(account)
}
