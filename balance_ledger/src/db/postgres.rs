//! PostgreSQL ledger store.
//!
//! Every unit of work is a sqlx transaction. Row locks come from
//! `SELECT ... FOR UPDATE`; the wait for a contended lock is bounded by the
//! transaction-local `lock_timeout`.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{Acquire, PgPool, Postgres, Row};
use std::sync::Arc;
use std::time::Duration;

use super::repository::{LedgerStore, StoreTransaction};
use crate::ledger::{
    Balance, LedgerError, LedgerResult, NewTransaction, Transaction, TransactionType, UserId,
};

/// SQL state raised when `lock_timeout` expires
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// SQL state raised when a value does not fit its `NUMERIC` column
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

const BALANCE_COLUMNS: &str = "id, user_id, balance, created_at, updated_at";

const TRANSACTION_COLUMNS: &str =
    "id, user_id, type, amount, comment, related_user_id, created_at";

/// PostgreSQL implementation of `LedgerStore`
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    /// Create a store over an existing pool
    ///
    /// # Arguments
    ///
    /// * `pool` - Database connection pool
    /// * `lock_timeout` - Maximum wait for a row lock; zero waits forever
    pub fn new(pool: Arc<PgPool>, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

/// Open unit of work on PostgreSQL
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgUnitOfWork;

    async fn begin(&self) -> LedgerResult<PgUnitOfWork> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        Ok(PgUnitOfWork { tx })
    }

    async fn read_balance(&self, user_id: UserId) -> LedgerResult<Option<Balance>> {
        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM balances WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(map_db_error)?;

        row.as_ref().map(balance_from_row).transpose()
    }

    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> LedgerResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE user_id = $1
             ORDER BY id DESC
             LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(map_db_error)?;

        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl StoreTransaction for PgUnitOfWork {
    async fn lock_balance(&mut self, user_id: UserId) -> LedgerResult<Option<Balance>> {
        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM balances WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        row.as_ref().map(balance_from_row).transpose()
    }

    async fn insert_balance(&mut self, user_id: UserId) -> LedgerResult<Balance> {
        // A failed statement aborts the whole PostgreSQL transaction, so the
        // insert runs in a savepoint that can be rolled back on its own.
        let mut savepoint = Acquire::begin(&mut self.tx).await.map_err(map_db_error)?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO balances (user_id, balance) VALUES ($1, 0) RETURNING {BALANCE_COLUMNS}"
        ))
        .bind(user_id)
        .fetch_one(&mut *savepoint)
        .await;

        match inserted {
            Ok(row) => {
                savepoint.commit().await.map_err(map_db_error)?;
                balance_from_row(&row)
            }
            Err(err) => {
                savepoint.rollback().await.map_err(map_db_error)?;
                if is_unique_violation(&err) {
                    Err(LedgerError::DuplicateProvisioning(user_id))
                } else {
                    Err(map_db_error(err))
                }
            }
        }
    }

    async fn apply_delta(&mut self, user_id: UserId, delta: Decimal) -> LedgerResult<Balance> {
        let row = sqlx::query(&format!(
            "UPDATE balances
             SET balance = balance + $1, updated_at = NOW()
             WHERE user_id = $2
             RETURNING {BALANCE_COLUMNS}"
        ))
        .bind(delta)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| LedgerError::Store(format!("no balance row for user {user_id}")))?;

        balance_from_row(&row)
    }

    async fn append_transaction(&mut self, entry: NewTransaction) -> LedgerResult<Transaction> {
        let row = sqlx::query(&format!(
            "INSERT INTO transactions (user_id, type, amount, comment, related_user_id)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(entry.user_id)
        .bind(entry.kind.to_string())
        .bind(entry.amount)
        .bind(entry.comment)
        .bind(entry.related_user_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        transaction_from_row(&row)
    }

    async fn commit(self) -> LedgerResult<()> {
        self.tx.commit().await.map_err(map_db_error)
    }

    async fn rollback(self) -> LedgerResult<()> {
        self.tx.rollback().await.map_err(map_db_error)
    }
}

/// Map driver errors onto ledger errors, classifying lock timeouts and column constraints
pub(crate) fn map_db_error(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) {
            return LedgerError::LockTimeout(db_err.message().to_string());
        }
        if matches!(db_err.kind(), sqlx::error::ErrorKind::CheckViolation)
            || db_err.code().as_deref() == Some(NUMERIC_VALUE_OUT_OF_RANGE)
        {
            return LedgerError::ConstraintViolation(db_err.message().to_string());
        }
    }
    LedgerError::Database(err)
}

/// Duplicate-key rejection as reported by the driver, independent of SQL state codes
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn balance_from_row(row: &PgRow) -> LedgerResult<Balance> {
    Ok(Balance {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        balance: row.try_get("balance")?,
        created_at: row.try_get::<NaiveDateTime, _>("created_at")?.and_utc(),
        updated_at: row.try_get::<NaiveDateTime, _>("updated_at")?.and_utc(),
    })
}

fn transaction_from_row(row: &PgRow) -> LedgerResult<Transaction> {
    Ok(Transaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: row.try_get::<String, _>("type")?.parse::<TransactionType>()?,
        amount: row.try_get("amount")?,
        comment: row.try_get("comment")?,
        related_user_id: row.try_get("related_user_id")?,
        created_at: row.try_get::<NaiveDateTime, _>("created_at")?.and_utc(),
    })
}
