//! Ledger behaviour against the in-memory store
//!
//! Covers the concrete account/transfer scenarios and the ledger properties:
//! atomicity, conservation, balance correctness with and without snapshots,
//! no negative balances, self-transfer rejection and idempotent reads. Most
//! tests run once per transfer mode, since both modes must behave identically.

use async_trait::async_trait;
use ledger_engine::codec;
use ledger_engine::config::{EngineOptions, SnapshotPolicy, TransferMode};
use ledger_engine::store::{InMemoryLedgerStore, InMemoryUnit, LedgerStore, StoreError, UnitOfWork};
use ledger_engine::types::{
    Account, AccountId, BalanceSnapshot, Direction, ErrorKind, LedgerError, NewTransaction,
    Transaction, TransactionId, Transfer, TransferRequest, OPAQUE_INTERNAL_MESSAGE,
};
use ledger_engine::LedgerEngine;
use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn engine_with(
    store: InMemoryLedgerStore,
    mode: TransferMode,
    snapshot_policy: SnapshotPolicy,
) -> LedgerEngine<InMemoryLedgerStore> {
    LedgerEngine::new(
        Arc::new(store),
        EngineOptions {
            transfer_mode: mode,
            snapshot_policy,
        },
    )
}

fn engine(mode: TransferMode) -> LedgerEngine<InMemoryLedgerStore> {
    engine_with(InMemoryLedgerStore::new(), mode, SnapshotPolicy::default())
}

/// Signed sum of every transfer-linked transaction (opening credits excluded)
fn transfer_net(store: &InMemoryLedgerStore) -> Decimal {
    store
        .all_transactions()
        .iter()
        .filter(|tx| tx.transfer_id.is_some())
        .map(|tx| tx.signed_amount())
        .sum()
}

#[tokio::test]
async fn test_create_account_then_balance() {
    let engine = engine(TransferMode::InProcess);
    let account = engine.create_account(100, dec!(500.00)).await.unwrap();
    assert_eq!(account.id, 100);
    assert_eq!(engine.get_balance(100).await.unwrap(), dec!(500.00));

    let entries = engine.store().transactions(100);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].direction, Direction::Credit);
    assert_eq!(entries[0].transfer_id, None);
}

#[rstest]
#[case::in_process(TransferMode::InProcess)]
#[case::stored_procedure(TransferMode::StoredProcedure)]
#[tokio::test]
async fn test_insufficient_funds_leaves_balances_unchanged(#[case] mode: TransferMode) {
    let engine = engine(mode);
    engine.create_account(100, dec!(500.00)).await.unwrap();
    engine.create_account(200, dec!(10)).await.unwrap();

    let err = engine
        .create_transfer_funds(100, 200, dec!(500.01))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(err.user_message(), "your account has insufficient funds");

    assert_eq!(engine.get_balance(100).await.unwrap(), dec!(500.00));
    assert_eq!(engine.get_balance(200).await.unwrap(), dec!(10));
    assert!(engine.store().transfers().is_empty());
    assert_eq!(engine.store().all_transactions().len(), 2);
}

#[rstest]
#[case::in_process(TransferMode::InProcess)]
#[case::stored_procedure(TransferMode::StoredProcedure)]
#[tokio::test]
async fn test_transfer_whole_balance(#[case] mode: TransferMode) {
    let engine = engine(mode);
    engine.create_account(100, dec!(500.00)).await.unwrap();
    engine.create_account(200, dec!(0.000001)).await.unwrap();

    let outcome = engine
        .create_transfer_funds(100, 200, dec!(500.00))
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.message, "Transfer completed successfully");

    assert_eq!(engine.get_balance(100).await.unwrap(), dec!(0.00));
    assert_eq!(engine.get_balance(200).await.unwrap(), dec!(500.000001));

    let transfers = engine.store().transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].id, outcome.transfer_id);
    let linked: Vec<_> = engine
        .store()
        .all_transactions()
        .into_iter()
        .filter(|tx| tx.transfer_id == Some(outcome.transfer_id))
        .collect();
    assert_eq!(linked.len(), 2);
    assert_eq!(linked[0].amount, linked[1].amount);
}

#[rstest]
#[case::in_process(TransferMode::InProcess)]
#[case::stored_procedure(TransferMode::StoredProcedure)]
#[tokio::test]
async fn test_missing_source_is_not_found(#[case] mode: TransferMode) {
    let engine = engine(mode);
    engine.create_account(200, dec!(1)).await.unwrap();

    let err = engine
        .create_transfer_funds(999, 200, dec!(10.00))
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::not_found("source account does not exist"));
    assert!(engine.store().transfers().is_empty());
}

#[rstest]
#[case::zero_balance(100, dec!(0), "validation error: initial balance is required")]
#[case::negative_balance(100, dec!(-5), "validation error: initial balance must be greater than 0")]
#[case::zero_id(0, dec!(1), "validation error: account id is required")]
#[case::too_precise(100, dec!(1.0000001), "validation error: initial balance has too many decimal places (max 6)")]
#[case::everything_wrong(0, dec!(0), "validation error: account id is required, initial balance is required")]
#[tokio::test]
async fn test_create_account_validation(
    #[case] account_id: u64,
    #[case] initial_balance: Decimal,
    #[case] expected: &str,
) {
    let engine = engine(TransferMode::InProcess);
    let err = engine
        .create_account(account_id, initial_balance)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.to_string(), expected);
    assert!(engine.store().account_ids().is_empty());
}

#[tokio::test]
async fn test_duplicate_account_is_conflict() {
    let engine = engine(TransferMode::InProcess);
    engine.create_account(100, dec!(5)).await.unwrap();

    let err = engine.create_account(100, dec!(7)).await.unwrap_err();
    assert_eq!(err, LedgerError::conflict(100));
    assert_eq!(engine.get_balance(100).await.unwrap(), dec!(5));
    assert_eq!(engine.store().transactions(100).len(), 1);
}

#[rstest]
#[case::in_process(TransferMode::InProcess)]
#[case::stored_procedure(TransferMode::StoredProcedure)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw(#[case] mode: TransferMode) {
    let engine = engine(mode);
    engine.create_account(100, dec!(500.00)).await.unwrap();
    engine.create_account(200, dec!(1)).await.unwrap();
    engine.create_account(300, dec!(1)).await.unwrap();

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.create_transfer_funds(100, 200, dec!(300.00)).await })
    };
    let second = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.create_transfer_funds(100, 300, dec!(300.00)).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(failure.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(engine.get_balance(100).await.unwrap(), dec!(200.00));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() {
    let store = InMemoryLedgerStore::new().with_lock_timeout(Duration::from_secs(2));
    let engine = engine_with(store, TransferMode::InProcess, SnapshotPolicy::default());
    engine.create_account(100, dec!(1000)).await.unwrap();
    engine.create_account(200, dec!(1000)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..50 {
        let engine = engine.clone();
        let (source, destination) = if i % 2 == 0 { (100, 200) } else { (200, 100) };
        handles.push(tokio::spawn(async move {
            engine
                .create_transfer_funds(source, destination, dec!(3.5))
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(engine.get_balance(100).await.unwrap(), dec!(1000));
    assert_eq!(engine.get_balance(200).await.unwrap(), dec!(1000));
    assert_eq!(transfer_net(engine.store()), Decimal::ZERO);
    assert_eq!(engine.store().transfers().len(), 50);
    assert_eq!(engine.store().all_transactions().len(), 2 + 100);
}

#[rstest]
#[case::in_process(TransferMode::InProcess)]
#[case::stored_procedure(TransferMode::StoredProcedure)]
#[tokio::test]
async fn test_self_transfer_is_rejected_without_writes(#[case] mode: TransferMode) {
    let engine = engine(mode);
    engine.create_account(100, dec!(500.00)).await.unwrap();

    let err = engine
        .create_transfer_funds(100, 100, dec!(50.00))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::validation("cannot transfer to the same account")
    );
    assert!(engine.store().transfers().is_empty());
    assert_eq!(engine.store().all_transactions().len(), 1);
}

#[rstest]
#[case::zero_amount(100, 200, dec!(0), "validation error: amount is required")]
#[case::negative_amount(100, 200, dec!(-1), "validation error: amount must be greater than 0")]
#[case::too_precise(100, 200, dec!(0.0000001), "validation error: amount has too many decimal places (max 6)")]
#[case::all_ids_missing(
    0,
    0,
    dec!(1),
    "validation error: source account id is required, destination account id is required"
)]
#[tokio::test]
async fn test_transfer_validation(
    #[case] source: u64,
    #[case] destination: u64,
    #[case] amount: Decimal,
    #[case] expected: &str,
) {
    let engine = engine(TransferMode::InProcess);
    let err = engine
        .create_transfer_funds(source, destination, amount)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), expected);
}

#[tokio::test]
async fn test_procedure_rejects_excess_precision() {
    let engine = engine(TransferMode::StoredProcedure);
    engine.create_account(100, dec!(10)).await.unwrap();
    engine.create_account(200, dec!(10)).await.unwrap();

    let packed = engine
        .store()
        .transfer_procedure(100, 200, dec!(1.0000001))
        .await
        .unwrap();
    let outcome = codec::decode(&packed).unwrap();
    assert!(!outcome.success);

    let request = TransferRequest::new(100, 200, dec!(1.0000001));
    let err = codec::classify(outcome, &request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(engine.store().transfers().is_empty());
}

#[tokio::test]
async fn test_snapshot_assisted_balance_matches_from_scratch() {
    let engine = engine_with(
        InMemoryLedgerStore::new(),
        TransferMode::InProcess,
        SnapshotPolicy::every(3),
    );
    engine.create_account(100, dec!(1000)).await.unwrap();
    engine.create_account(200, dec!(1)).await.unwrap();

    let mut expected = dec!(1000);
    for i in 1..=10u32 {
        let amount = Decimal::new(i64::from(i) * 125, 2);
        engine.create_transfer_funds(100, 200, amount).await.unwrap();
        expected -= amount;
        assert_eq!(engine.get_balance(100).await.unwrap(), expected);
    }
    assert!(!engine.store().snapshots(100).is_empty());

    let reconciliation = engine.reconcile(100).await.unwrap();
    assert!(reconciliation.is_consistent());
    assert_eq!(reconciliation.from_scratch, expected);

    // Snapshots are a cache: dropping them changes nothing
    engine.store().purge_snapshots(100);
    assert_eq!(engine.get_balance(100).await.unwrap(), expected);
}

#[tokio::test]
async fn test_snapshot_points_at_last_folded_transaction() {
    let engine = engine_with(
        InMemoryLedgerStore::new(),
        TransferMode::InProcess,
        SnapshotPolicy::every(1),
    );
    engine.create_account(100, dec!(42)).await.unwrap();
    engine.get_balance(100).await.unwrap();

    let snapshots = engine.store().snapshots(100);
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].balance, dec!(42));
    assert_eq!(
        snapshots[0].last_transaction_id,
        engine.store().transactions(100)[0].id
    );

    // Nothing new to fold, so no further snapshot
    engine.get_balance(100).await.unwrap();
    assert_eq!(engine.store().snapshots(100).len(), 1);
}

#[tokio::test]
async fn test_disabled_snapshots_are_never_written() {
    let engine = engine_with(
        InMemoryLedgerStore::new(),
        TransferMode::InProcess,
        SnapshotPolicy::disabled(),
    );
    engine.create_account(100, dec!(42)).await.unwrap();
    for _ in 0..5 {
        engine.get_balance(100).await.unwrap();
    }
    assert!(engine.store().snapshots(100).is_empty());
}

#[tokio::test]
async fn test_repeated_reads_are_identical() {
    let engine = engine(TransferMode::InProcess);
    engine.create_account(100, dec!(73.125)).await.unwrap();
    engine.create_account(200, dec!(1)).await.unwrap();
    engine.create_transfer_funds(100, 200, dec!(0.125)).await.unwrap();

    let first = engine.get_balance(100).await.unwrap();
    for _ in 0..10 {
        assert_eq!(engine.get_balance(100).await.unwrap(), first);
    }
    assert_eq!(first, dec!(73.000));
}

#[rstest]
#[case::zero(0, ErrorKind::Validation)]
#[case::missing(999, ErrorKind::NotFound)]
#[tokio::test]
async fn test_balance_errors(#[case] account_id: u64, #[case] expected: ErrorKind) {
    let engine = engine(TransferMode::InProcess);
    let err = engine.get_balance(account_id).await.unwrap_err();
    assert_eq!(err.kind(), expected);
}

#[tokio::test]
async fn test_cancelled_engine_fails_fast() {
    let cancel = CancellationToken::new();
    let engine = engine(TransferMode::InProcess).with_cancellation(cancel.clone());
    engine.create_account(100, dec!(10)).await.unwrap();

    cancel.cancel();
    let err = engine.create_account(200, dec!(10)).await.unwrap_err();
    assert_eq!(err, LedgerError::internal("operation cancelled"));
    assert_eq!(err.user_message(), OPAQUE_INTERNAL_MESSAGE);
    assert_eq!(engine.store().account_ids(), vec![100]);

    let err = engine.get_balance(100).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[tokio::test]
async fn test_lock_wait_timeout_is_internal() {
    let store = InMemoryLedgerStore::new().with_lock_timeout(Duration::from_millis(20));
    let engine = engine_with(store, TransferMode::InProcess, SnapshotPolicy::default());
    engine.create_account(100, dec!(10)).await.unwrap();
    engine.create_account(200, dec!(10)).await.unwrap();

    let mut holder = engine.store().begin().await.unwrap();
    holder.lock_account(100).await.unwrap();

    let err = engine
        .create_transfer_funds(100, 200, dec!(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    holder.rollback().await.unwrap();

    assert!(engine.create_transfer_funds(100, 200, dec!(1)).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_while_waiting_rolls_back_transfer() {
    let engine = engine(TransferMode::InProcess);
    engine.create_account(100, dec!(10)).await.unwrap();
    engine.create_account(200, dec!(10)).await.unwrap();

    let mut holder = engine.store().begin().await.unwrap();
    holder.lock_account(100).await.unwrap();

    let cancel = CancellationToken::new();
    let pending = {
        let engine = engine.clone().with_cancellation(cancel.clone());
        tokio::spawn(async move { engine.create_transfer_funds(100, 200, dec!(5)).await })
    };
    // The transfer has opened its unit and is parked on account 100
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());

    cancel.cancel();
    holder.rollback().await.unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err, LedgerError::internal("operation cancelled"));
    assert!(engine.store().transfers().is_empty());
    assert_eq!(engine.store().all_transactions().len(), 2);
    assert_eq!(engine.get_balance(100).await.unwrap(), dec!(10));
    assert_eq!(engine.get_balance(200).await.unwrap(), dec!(10));
}

/// In-memory store whose units fail every ledger entry insert
struct EntryRejectingStore(InMemoryLedgerStore);

struct EntryRejectingUnit(InMemoryUnit);

#[async_trait]
impl LedgerStore for EntryRejectingStore {
    type Unit = EntryRejectingUnit;

    async fn begin(&self) -> Result<Self::Unit, StoreError> {
        Ok(EntryRejectingUnit(self.0.begin().await?))
    }

    async fn transfer_procedure(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<String, StoreError> {
        self.0.transfer_procedure(source, destination, amount).await
    }
}

#[async_trait]
impl UnitOfWork for EntryRejectingUnit {
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.0.lock_account(id).await
    }

    async fn insert_account(&mut self, id: AccountId) -> Result<Account, StoreError> {
        self.0.insert_account(id).await
    }

    async fn latest_snapshot_for_update(
        &mut self,
        account: AccountId,
    ) -> Result<Option<BalanceSnapshot>, StoreError> {
        self.0.latest_snapshot_for_update(account).await
    }

    async fn transactions_after(
        &mut self,
        account: AccountId,
        after: TransactionId,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.0.transactions_after(account, after).await
    }

    async fn insert_transfer(
        &mut self,
        source: AccountId,
        destination: AccountId,
    ) -> Result<Transfer, StoreError> {
        self.0.insert_transfer(source, destination).await
    }

    async fn insert_transaction(
        &mut self,
        _entry: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        Err(StoreError::query("insert_transaction", "connection reset"))
    }

    async fn insert_snapshot(
        &mut self,
        account: AccountId,
        balance: Decimal,
        last_transaction_id: TransactionId,
    ) -> Result<BalanceSnapshot, StoreError> {
        self.0.insert_snapshot(account, balance, last_transaction_id).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.0.commit().await
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.0.rollback().await
    }
}

#[tokio::test]
async fn test_failed_opening_credit_leaves_no_account() {
    let store = Arc::new(EntryRejectingStore(InMemoryLedgerStore::new()));
    let engine = LedgerEngine::new(Arc::clone(&store), EngineOptions::default());

    let err = engine.create_account(100, dec!(10)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.user_message(), OPAQUE_INTERNAL_MESSAGE);

    assert!(store.0.account_ids().is_empty());
    assert!(store.0.all_transactions().is_empty());
    let mut unit = store.0.begin().await.unwrap();
    assert!(unit.lock_account(100).await.unwrap().is_none());
}
