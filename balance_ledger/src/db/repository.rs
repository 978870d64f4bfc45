//! Repository trait definitions for testability and dependency injection.
//!
//! The ledger engine only talks to storage through these traits:
//!
//! - [`UserDirectory`] answers whether a user id exists.
//! - [`LedgerStore`] opens units of work and serves non-locking reads.
//! - [`StoreTransaction`] is one open unit of work. Every write goes through it,
//!   becomes visible on [`StoreTransaction::commit`], and is discarded on
//!   [`StoreTransaction::rollback`] or when the handle is dropped.
//!
//! PostgreSQL implementations live here and in [`super::postgres`]; in-process
//! implementations live in [`super::memory`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::sync::Arc;

use crate::ledger::{Balance, LedgerResult, NewTransaction, Transaction, UserId};

/// Trait for the user-existence check supplied by account management
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Whether a user with this id exists
    async fn user_exists(&self, user_id: UserId) -> LedgerResult<bool>;
}

/// Trait for a durable balance/transaction store with row-level locking
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Unit-of-work handle produced by [`LedgerStore::begin`]
    type Tx: StoreTransaction;

    /// Open a new unit of work
    async fn begin(&self) -> LedgerResult<Self::Tx>;

    /// Read a balance without locking and outside any unit of work
    async fn read_balance(&self, user_id: UserId) -> LedgerResult<Option<Balance>>;

    /// Committed transaction entries for a user, newest first
    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> LedgerResult<Vec<Transaction>>;
}

/// One open unit of work
#[async_trait]
pub trait StoreTransaction: Send {
    /// Read the balance row and hold an exclusive lock on it until the unit of
    /// work ends. Returns `None` (and holds no lock) when the row is absent.
    async fn lock_balance(&mut self, user_id: UserId) -> LedgerResult<Option<Balance>>;

    /// Insert a zero balance row for the user and hold its lock.
    ///
    /// Fails with [`LedgerError::DuplicateProvisioning`](crate::ledger::LedgerError::DuplicateProvisioning)
    /// when the unique key on `user_id` rejects the row. That failure leaves the
    /// unit of work usable.
    async fn insert_balance(&mut self, user_id: UserId) -> LedgerResult<Balance>;

    /// Add `delta` (possibly negative) to a row locked by this unit of work and
    /// return the updated row
    async fn apply_delta(&mut self, user_id: UserId, delta: Decimal) -> LedgerResult<Balance>;

    /// Append an entry to the transaction log
    async fn append_transaction(&mut self, entry: NewTransaction) -> LedgerResult<Transaction>;

    /// Make every write of this unit of work durable and release its locks
    async fn commit(self) -> LedgerResult<()>;

    /// Discard every write of this unit of work and release its locks
    async fn rollback(self) -> LedgerResult<()>;
}

/// Default PostgreSQL implementation of `UserDirectory`
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: Arc<PgPool>,
}

impl PgUserDirectory {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Insert a user, or return the id of the user already registered with `email`
    pub async fn upsert_user(&self, name: &str, email: &str) -> LedgerResult<UserId> {
        let row = sqlx::query(
            "INSERT INTO users (name, email) VALUES ($1, $2)
             ON CONFLICT (email) DO UPDATE SET name = EXCLUDED.name
             RETURNING id",
        )
        .bind(name)
        .bind(email)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(row.try_get("id")?)
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn user_exists(&self, user_id: UserId) -> LedgerResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1) AS found")
            .bind(user_id)
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(row.try_get("found")?)
    }
}
