//! Postgres-backed ledger store
//!
//! A unit of work is a `sqlx::Transaction`; dropping it without commit rolls it
//! back. Locking reads use `SELECT ... FOR UPDATE`, and every unit sets a local
//! `lock_timeout` so lock waits stay bounded.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` |
//! | Database (foreign key violation) | `23503` | `ForeignKeyViolation` |
//! | Database (check constraint violation) | `23514` | `Integrity` |
//! | Database (lock not available) | `55P03` | `LockTimeout` |
//! | Database (other) | Any other | `Query` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | Other | N/A | `Query` |
//!
//! Identifiers are `BIGINT` columns; ids that do not fit are rejected before a
//! query is sent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction as PgTransaction};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::types::{
    Account, AccountId, BalanceSnapshot, Direction, NewTransaction, Transaction, TransactionId,
    Transfer,
};

use super::{LedgerStore, StoreError, UnitOfWork};

const SCHEMA: &str = include_str!("../../migrations/0001_ledger.sql");

/// Postgres implementation of [`LedgerStore`]
///
/// Cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Open a bounded pool described by `config`
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig, lock_timeout: Duration) -> Result<Self, StoreError> {
        let url = config.url.as_deref().ok_or_else(|| StoreError::Unavailable {
            operation: "connect".to_string(),
            message: "database url is not configured".to_string(),
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        info!("connected to postgres");
        Ok(Self::new(pool, lock_timeout))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger tables and the transfer routine if they are missing
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        info!("ledger schema applied");
        Ok(())
    }

    async fn begin_with_timeout(
        &self,
        operation: &str,
    ) -> Result<PgTransaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(tx)
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Unit = PgUnit;

    async fn begin(&self) -> Result<Self::Unit, StoreError> {
        Ok(PgUnit {
            tx: self.begin_with_timeout("begin").await?,
        })
    }

    async fn transfer_procedure(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<String, StoreError> {
        const OPERATION: &str = "transfer_procedure";
        let mut tx = self.begin_with_timeout(OPERATION).await?;
        let packed: String =
            sqlx::query_scalar("SELECT create_transfer_transaction($1, $2, $3)::text")
                .bind(to_db(OPERATION, source)?)
                .bind(to_db(OPERATION, destination)?)
                .bind(amount)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(OPERATION, e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(OPERATION, e))?;
        debug!(%packed, "create_transfer_transaction returned");
        Ok(packed)
    }
}

/// Unit of work over a Postgres transaction
pub struct PgUnit {
    tx: PgTransaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        const OPERATION: &str = "lock_account";
        let row: Option<AccountRow> =
            sqlx::query_as("SELECT id, created_at, updated_at FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(to_db(OPERATION, id)?)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error(OPERATION, e))?;
        row.map(Account::try_from).transpose()
    }

    async fn insert_account(&mut self, id: AccountId) -> Result<Account, StoreError> {
        const OPERATION: &str = "insert_account";
        let row: AccountRow = sqlx::query_as(
            "INSERT INTO accounts (id) VALUES ($1) RETURNING id, created_at, updated_at",
        )
        .bind(to_db(OPERATION, id)?)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error(OPERATION, e))?;
        Account::try_from(row)
    }

    async fn latest_snapshot_for_update(
        &mut self,
        account: AccountId,
    ) -> Result<Option<BalanceSnapshot>, StoreError> {
        const OPERATION: &str = "latest_snapshot_for_update";
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, balance, last_transaction_id, created_at
            FROM account_balance_snapshots
            WHERE account_id = $1
            ORDER BY id DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(to_db(OPERATION, account)?)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error(OPERATION, e))?;
        row.map(BalanceSnapshot::try_from).transpose()
    }

    async fn transactions_after(
        &mut self,
        account: AccountId,
        after: TransactionId,
    ) -> Result<Vec<Transaction>, StoreError> {
        const OPERATION: &str = "transactions_after";
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, transfer_id, amount, direction, created_at
            FROM transactions
            WHERE account_id = $1 AND id > $2
            ORDER BY id ASC
            "#,
        )
        .bind(to_db(OPERATION, account)?)
        .bind(to_db(OPERATION, after)?)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error(OPERATION, e))?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn insert_transfer(
        &mut self,
        source: AccountId,
        destination: AccountId,
    ) -> Result<Transfer, StoreError> {
        const OPERATION: &str = "insert_transfer";
        let row: TransferRow = sqlx::query_as(
            r#"
            INSERT INTO transfers (source_account_id, destination_account_id)
            VALUES ($1, $2)
            RETURNING id, source_account_id, destination_account_id, created_at
            "#,
        )
        .bind(to_db(OPERATION, source)?)
        .bind(to_db(OPERATION, destination)?)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error(OPERATION, e))?;
        Transfer::try_from(row)
    }

    async fn insert_transaction(
        &mut self,
        entry: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        const OPERATION: &str = "insert_transaction";
        let transfer_id = entry
            .transfer_id
            .map(|id| to_db(OPERATION, id))
            .transpose()?;
        let row: TransactionRow = sqlx::query_as(
            r#"
            INSERT INTO transactions (account_id, transfer_id, amount, direction)
            VALUES ($1, $2, $3, $4)
            RETURNING id, account_id, transfer_id, amount, direction, created_at
            "#,
        )
        .bind(to_db(OPERATION, entry.account_id)?)
        .bind(transfer_id)
        .bind(entry.amount)
        .bind(entry.direction.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error(OPERATION, e))?;
        Transaction::try_from(row)
    }

    async fn insert_snapshot(
        &mut self,
        account: AccountId,
        balance: Decimal,
        last_transaction_id: TransactionId,
    ) -> Result<BalanceSnapshot, StoreError> {
        const OPERATION: &str = "insert_snapshot";
        let row: SnapshotRow = sqlx::query_as(
            r#"
            INSERT INTO account_balance_snapshots (account_id, balance, last_transaction_id)
            VALUES ($1, $2, $3)
            RETURNING id, account_id, balance, last_transaction_id, created_at
            "#,
        )
        .bind(to_db(OPERATION, account)?)
        .bind(balance)
        .bind(to_db(OPERATION, last_transaction_id)?)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error(OPERATION, e))?;
        BalanceSnapshot::try_from(row)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn to_db(operation: &str, id: u64) -> Result<i64, StoreError> {
    i64::try_from(id)
        .map_err(|_| StoreError::query(operation, format!("identifier {} out of range", id)))
}

fn from_db(column: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::Integrity(format!("negative {} read from store: {}", column, value)))
}

/// Map SQLx errors onto store errors by SQLSTATE
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            match db_err.code().as_deref() {
                Some("23505") => StoreError::unique_violation(operation, message),
                Some("23503") => StoreError::foreign_key_violation(operation, message),
                Some("23514") => {
                    StoreError::Integrity(format!("check constraint in {}: {}", operation, message))
                }
                Some("55P03") => StoreError::lock_timeout(operation),
                _ => StoreError::query(operation, message),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable {
            operation: operation.to_string(),
            message: "connection pool closed".to_string(),
        },
        sqlx::Error::PoolTimedOut => StoreError::Unavailable {
            operation: operation.to_string(),
            message: "timed out acquiring a connection".to_string(),
        },
        sqlx::Error::Io(io) => StoreError::Unavailable {
            operation: operation.to_string(),
            message: io.to_string(),
        },
        other => StoreError::query(operation, other.to_string()),
    }
}

// SQLx row types

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: from_db("accounts.id", row.id)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: i64,
    account_id: i64,
    transfer_id: Option<i64>,
    amount: Decimal,
    direction: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let direction: Direction = row.direction.parse().map_err(StoreError::Integrity)?;
        Ok(Transaction {
            id: from_db("transactions.id", row.id)?,
            account_id: from_db("transactions.account_id", row.account_id)?,
            transfer_id: row
                .transfer_id
                .map(|id| from_db("transactions.transfer_id", id))
                .transpose()?,
            amount: row.amount,
            direction,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransferRow {
    id: i64,
    source_account_id: i64,
    destination_account_id: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransferRow> for Transfer {
    type Error = StoreError;

    fn try_from(row: TransferRow) -> Result<Self, Self::Error> {
        Ok(Transfer {
            id: from_db("transfers.id", row.id)?,
            source_account_id: from_db("transfers.source_account_id", row.source_account_id)?,
            destination_account_id: from_db(
                "transfers.destination_account_id",
                row.destination_account_id,
            )?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    id: i64,
    account_id: i64,
    balance: Decimal,
    last_transaction_id: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<SnapshotRow> for BalanceSnapshot {
    type Error = StoreError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(BalanceSnapshot {
            id: from_db("account_balance_snapshots.id", row.id)?,
            account_id: from_db("account_balance_snapshots.account_id", row.account_id)?,
            balance: row.balance,
            last_transaction_id: from_db(
                "account_balance_snapshots.last_transaction_id",
                row.last_transaction_id,
            )?,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_beyond_bigint_are_rejected() {
        let err = to_db("lock_account", u64::MAX).unwrap_err();
        assert!(matches!(err, StoreError::Query { .. }));
        assert_eq!(to_db("lock_account", 42).unwrap(), 42);
    }

    #[test]
    fn test_negative_ids_from_store_are_integrity_errors() {
        let err = from_db("accounts.id", -1).unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
    }

    #[test]
    fn test_pool_closed_is_unavailable() {
        let err = map_sqlx_error("begin", sqlx::Error::PoolClosed);
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[test]
    fn test_invalid_direction_is_integrity_error() {
        let row = TransactionRow {
            id: 1,
            account_id: 100,
            transfer_id: None,
            amount: Decimal::ONE,
            direction: "SIDEWAYS".to_string(),
            created_at: Utc::now(),
        };
        assert!(matches!(
            Transaction::try_from(row),
            Err(StoreError::Integrity(_))
        ));
    }
}
