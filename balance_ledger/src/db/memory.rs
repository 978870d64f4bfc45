//! In-process ledger store.
//!
//! Behaves like a row-locking transactional database for a single process:
//!
//! - each balance row has an exclusive lock, held by at most one unit of work
//!   and released when that unit of work commits, rolls back or is dropped
//!   (locks nobody holds or waits for are then forgotten);
//! - writes are buffered per unit of work and applied atomically on commit;
//! - creating a second balance row for a user is rejected as a duplicate key;
//! - a balance may never go below zero (`CHECK balance >= 0`) nor above what
//!   `NUMERIC(15, 2)` holds;
//! - waiting for a row lock fails with [`LedgerError::LockTimeout`] after the
//!   configured timeout (zero waits forever).
//!
//! Used by the test suites and for running the ledger without PostgreSQL.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use super::repository::{LedgerStore, StoreTransaction, UserDirectory};
use crate::ledger::{
    Balance, LedgerError, LedgerResult, NewTransaction, STORABLE_AMOUNT_CEILING, Transaction,
    UserId,
};

/// Default wait for a contended row lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Committed {
    balances: Vec<Balance>,
    transactions: Vec<Transaction>,
}

struct Inner {
    committed: Mutex<Committed>,
    row_locks: Mutex<HashMap<UserId, Arc<RowLock<()>>>>,
    next_balance_id: AtomicI64,
    next_transaction_id: AtomicI64,
    lock_timeout: Duration,
}

impl Inner {
    fn committed(&self) -> MutexGuard<'_, Committed> {
        self.committed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, user_id: UserId) -> Arc<RowLock<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(user_id).or_default().clone()
    }

    /// Forget row locks nobody holds or waits for
    ///
    /// Holders and waiters keep their own `Arc`, so a count of one means the
    /// map is the only owner.
    fn prune_row_locks(&self) {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// In-process implementation of `LedgerStore`
#[derive(Clone)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                committed: Mutex::new(Committed::default()),
                row_locks: Mutex::new(HashMap::new()),
                next_balance_id: AtomicI64::new(1),
                next_transaction_id: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }

    /// Every committed balance row for a user (never more than one)
    pub fn balance_rows(&self, user_id: UserId) -> Vec<Balance> {
        self.inner
            .committed()
            .balances
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect()
    }

    /// The whole committed transaction log in insertion order
    pub fn transaction_log(&self) -> Vec<Transaction> {
        self.inner.committed().transactions.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> LedgerResult<MemoryTransaction> {
        Ok(MemoryTransaction {
            inner: self.inner.clone(),
            held: HashMap::new(),
            written: HashMap::new(),
            appended: Vec::new(),
        })
    }

    async fn read_balance(&self, user_id: UserId) -> LedgerResult<Option<Balance>> {
        Ok(self
            .inner
            .committed()
            .balances
            .iter()
            .find(|row| row.user_id == user_id)
            .cloned())
    }

    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> LedgerResult<Vec<Transaction>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .inner
            .committed()
            .transactions
            .iter()
            .rev()
            .filter(|entry| entry.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Open unit of work on a `MemoryLedgerStore`
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    held: HashMap<UserId, OwnedMutexGuard<()>>,
    written: HashMap<UserId, Balance>,
    appended: Vec<Transaction>,
}

impl MemoryTransaction {
    async fn acquire(&mut self, user_id: UserId) -> LedgerResult<()> {
        if self.held.contains_key(&user_id) {
            return Ok(());
        }

        let lock = self.inner.row_lock(user_id);
        let timeout = self.inner.lock_timeout;
        let guard = if timeout.is_zero() {
            lock.lock_owned().await
        } else {
            tokio::time::timeout(timeout, lock.lock_owned())
                .await
                .map_err(|_| {
                    LedgerError::LockTimeout(format!(
                        "balance row for user {user_id} still locked after {timeout:?}"
                    ))
                })?
        };

        self.held.insert(user_id, guard);
        Ok(())
    }

    /// Row as seen by this unit of work: own writes first, then committed state
    fn visible(&self, user_id: UserId) -> Option<Balance> {
        self.written.get(&user_id).cloned().or_else(|| {
            self.inner
                .committed()
                .balances
                .iter()
                .find(|row| row.user_id == user_id)
                .cloned()
        })
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_balance(&mut self, user_id: UserId) -> LedgerResult<Option<Balance>> {
        let already_held = self.held.contains_key(&user_id);
        self.acquire(user_id).await?;

        let row = self.visible(user_id);
        if row.is_none() && !already_held {
            // Absent rows cannot be locked
            self.held.remove(&user_id);
        }
        Ok(row)
    }

    async fn insert_balance(&mut self, user_id: UserId) -> LedgerResult<Balance> {
        self.acquire(user_id).await?;

        if self.visible(user_id).is_some() {
            return Err(LedgerError::DuplicateProvisioning(user_id));
        }

        let now = Utc::now();
        let row = Balance {
            id: self.inner.next_balance_id.fetch_add(1, Ordering::Relaxed),
            user_id,
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        self.written.insert(user_id, row.clone());
        Ok(row)
    }

    async fn apply_delta(&mut self, user_id: UserId, delta: Decimal) -> LedgerResult<Balance> {
        if !self.held.contains_key(&user_id) {
            return Err(LedgerError::Store(format!(
                "balance row for user {user_id} is not locked by this unit of work"
            )));
        }

        let mut row = self
            .visible(user_id)
            .ok_or_else(|| LedgerError::Store(format!("no balance row for user {user_id}")))?;

        let updated = row
            .balance
            .checked_add(delta)
            .filter(|b| *b <= STORABLE_AMOUNT_CEILING)
            .ok_or_else(|| {
                LedgerError::ConstraintViolation(format!(
                    "balance for user {user_id} overflows the balance column"
                ))
            })?;
        if updated < Decimal::ZERO {
            return Err(LedgerError::ConstraintViolation(format!(
                "balance for user {user_id} would become {updated}"
            )));
        }

        row.balance = updated;
        row.updated_at = Utc::now();
        self.written.insert(user_id, row.clone());
        Ok(row)
    }

    async fn append_transaction(&mut self, entry: NewTransaction) -> LedgerResult<Transaction> {
        let recorded = Transaction {
            id: self.inner.next_transaction_id.fetch_add(1, Ordering::Relaxed),
            user_id: entry.user_id,
            kind: entry.kind,
            amount: entry.amount,
            comment: entry.comment,
            related_user_id: entry.related_user_id,
            created_at: Utc::now(),
        };
        self.appended.push(recorded.clone());
        Ok(recorded)
    }

    async fn commit(mut self) -> LedgerResult<()> {
        {
            let mut committed = self.inner.committed();
            for (user_id, row) in std::mem::take(&mut self.written) {
                match committed.balances.iter_mut().find(|b| b.user_id == user_id) {
                    Some(existing) => *existing = row,
                    None => committed.balances.push(row),
                }
            }
            committed
                .transactions
                .extend(std::mem::take(&mut self.appended));
        }

        // Locks are released by the drop, after the writes are visible
        Ok(())
    }

    async fn rollback(self) -> LedgerResult<()> {
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.held.clear();
        self.inner.prune_row_locks();
    }
}

/// In-process implementation of `UserDirectory`
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashSet<UserId>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(user_ids: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            users: Mutex::new(user_ids.into_iter().collect()),
        }
    }

    pub fn add_user(&self, user_id: UserId) {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn user_exists(&self, user_id: UserId) -> LedgerResult<bool> {
        Ok(self
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&user_id))
    }
}
