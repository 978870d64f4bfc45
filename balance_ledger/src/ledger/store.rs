//! Balance store operations.
//!
//! Lock-scoped reads and writes of a single user's balance row, expressed over
//! any [`StoreTransaction`]. All money arithmetic below the ledger engine goes
//! through these functions.

use rust_decimal::Decimal;

use super::errors::{LedgerError, LedgerResult};
use super::models::{Balance, UserId};
use crate::db::{LedgerStore, StoreTransaction};

/// Lock and return the user's balance row, or `None` if the user has none yet
pub async fn locked_get<T: StoreTransaction>(
    tx: &mut T,
    user_id: UserId,
) -> LedgerResult<Option<Balance>> {
    tx.lock_balance(user_id).await
}

/// Lock and return the user's balance row, creating it with a zero balance if absent
///
/// Two units of work can both observe a missing row and both try to create it.
/// The store's unique key lets exactly one insert through; the loser gets
/// [`LedgerError::DuplicateProvisioning`] once the winner commits, and recovers
/// by locking the row the winner created. The retry happens once: after a
/// duplicate-key rejection the row is committed and can only be locked, not
/// created.
pub async fn get_or_create<T: StoreTransaction>(
    tx: &mut T,
    user_id: UserId,
) -> LedgerResult<Balance> {
    if let Some(balance) = tx.lock_balance(user_id).await? {
        return Ok(balance);
    }

    match tx.insert_balance(user_id).await {
        Ok(balance) => {
            log::debug!("Provisioned balance for user {}", user_id);
            Ok(balance)
        }
        Err(LedgerError::DuplicateProvisioning(_)) => {
            log::info!(
                "Balance for user {} was provisioned concurrently, locking existing row",
                user_id
            );
            tx.lock_balance(user_id).await?.ok_or_else(|| {
                LedgerError::Store(format!(
                    "balance row for user {user_id} missing after duplicate-key rejection"
                ))
            })
        }
        Err(err) => Err(err),
    }
}

/// Add `amount` to a locked balance
pub async fn increment<T: StoreTransaction>(
    tx: &mut T,
    balance: &Balance,
    amount: Decimal,
) -> LedgerResult<Balance> {
    tx.apply_delta(balance.user_id, amount).await
}

/// Subtract `amount` from a locked balance
///
/// Callers check [`ensure_sufficient`] in the same unit of work first; the
/// store's non-negative constraint is the last line, not the check.
pub async fn decrement<T: StoreTransaction>(
    tx: &mut T,
    balance: &Balance,
    amount: Decimal,
) -> LedgerResult<Balance> {
    tx.apply_delta(balance.user_id, -amount).await
}

/// Pass the locked balance through if it covers `amount`, else fail with `InsufficientFunds`
///
/// An absent balance row counts as zero.
pub fn ensure_sufficient(
    user_id: UserId,
    balance: Option<Balance>,
    amount: Decimal,
) -> LedgerResult<Balance> {
    match balance {
        Some(balance) if balance.balance >= amount => Ok(balance),
        other => Err(LedgerError::InsufficientFunds {
            user_id,
            available: other.map_or(Decimal::ZERO, |b| b.balance),
            required: amount,
        }),
    }
}

/// Advisory read without a lock, for balance inquiries
pub async fn read_unlocked<S: LedgerStore>(
    store: &S,
    user_id: UserId,
) -> LedgerResult<Option<Balance>> {
    store.read_balance(user_id).await
}
