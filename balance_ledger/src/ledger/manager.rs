//! Ledger manager: deposits, withdrawals, transfers and balance inquiries.
//!
//! Every mutating operation runs as one unit of work opened on the
//! [`LedgerStore`]. The unit of work is committed only when every step
//! succeeded and is rolled back otherwise, so a failed operation leaves
//! balances and the transaction log exactly as they were.

use rust_decimal::Decimal;
use std::sync::Arc;

use super::{
    config::LedgerConfig,
    errors::{LedgerError, LedgerResult},
    models::{Balance, BalanceSnapshot, NewTransaction, Transaction, TransferReceipt, UserId},
    store,
};
use crate::db::{LedgerStore, PgLedgerStore, StoreTransaction, UserDirectory};

/// Ledger manager backed by PostgreSQL
pub type PgLedgerManager = LedgerManager<PgLedgerStore>;

/// Ledger manager
pub struct LedgerManager<S> {
    store: S,
    users: Arc<dyn UserDirectory>,
    config: LedgerConfig,
}

impl<S: LedgerStore> LedgerManager<S> {
    /// Create a new ledger manager
    ///
    /// # Arguments
    ///
    /// * `store` - Balance and transaction store
    /// * `users` - User-existence check
    pub fn new(store: S, users: Arc<dyn UserDirectory>) -> Self {
        Self::with_config(store, users, LedgerConfig::default())
    }

    pub fn with_config(store: S, users: Arc<dyn UserDirectory>, config: LedgerConfig) -> Self {
        Self {
            store,
            users,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Credit a user's balance, provisioning it on first use
    ///
    /// # Arguments
    ///
    /// * `user_id` - User to credit
    /// * `amount` - Positive amount
    /// * `comment` - Free text stored on the transaction entry
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - Amount not positive, too large or too precise
    /// * `LedgerError::UserNotFound` - User does not exist
    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        comment: Option<String>,
    ) -> LedgerResult<BalanceSnapshot> {
        self.validate_amount(amount)?;
        self.ensure_user(user_id).await?;

        let mut tx = self.store.begin().await?;
        let outcome = Self::deposit_in(&mut tx, user_id, amount, comment).await;
        let balance = finish(tx, outcome).await?;

        log::debug!("Deposited {} for user {}", amount, user_id);
        Ok(BalanceSnapshot {
            user_id,
            balance: balance.balance,
        })
    }

    /// Debit a user's balance
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - Amount not positive, too large or too precise
    /// * `LedgerError::UserNotFound` - User does not exist
    /// * `LedgerError::InsufficientFunds` - No balance or balance below `amount`
    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: Decimal,
        comment: Option<String>,
    ) -> LedgerResult<BalanceSnapshot> {
        self.validate_amount(amount)?;
        self.ensure_user(user_id).await?;

        let mut tx = self.store.begin().await?;
        let outcome = Self::withdraw_in(&mut tx, user_id, amount, comment).await;
        let balance = finish(tx, outcome).await?;

        log::debug!("Withdrew {} for user {}", amount, user_id);
        Ok(BalanceSnapshot {
            user_id,
            balance: balance.balance,
        })
    }

    /// Move funds between two users, provisioning the recipient's balance on first use
    ///
    /// Row locks are taken in ascending user id order whatever the direction,
    /// so two opposite transfers between the same users cannot deadlock.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - Amount not positive, too large or too precise
    /// * `LedgerError::InvalidTransfer` - Sender and recipient are the same user
    /// * `LedgerError::UserNotFound` - Either user does not exist
    /// * `LedgerError::InsufficientFunds` - Sender has no balance or too little
    pub async fn transfer(
        &self,
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Decimal,
        comment: Option<String>,
    ) -> LedgerResult<TransferReceipt> {
        self.validate_amount(amount)?;
        if from_user_id == to_user_id {
            return Err(LedgerError::InvalidTransfer(
                "sender and recipient must differ".to_string(),
            ));
        }
        self.ensure_user(from_user_id).await?;
        self.ensure_user(to_user_id).await?;

        let mut tx = self.store.begin().await?;
        let outcome = Self::transfer_in(&mut tx, from_user_id, to_user_id, amount, comment).await;
        let (from, to) = finish(tx, outcome).await?;

        log::debug!(
            "Transferred {} from user {} to user {}",
            amount,
            from_user_id,
            to_user_id
        );
        Ok(TransferReceipt {
            from_user_id,
            to_user_id,
            from_balance: from.balance,
            to_balance: to.balance,
        })
    }

    /// Current balance of a user; zero when no balance row exists yet
    ///
    /// Does not lock and does not create a balance row.
    pub async fn get_balance(&self, user_id: UserId) -> LedgerResult<BalanceSnapshot> {
        self.ensure_user(user_id).await?;

        let balance = store::read_unlocked(&self.store, user_id)
            .await?
            .map_or(Decimal::ZERO, |b| b.balance);

        Ok(BalanceSnapshot { user_id, balance })
    }

    /// Transaction history of a user, newest first
    ///
    /// # Arguments
    ///
    /// * `user_id` - User ID
    /// * `limit` - Maximum number of entries; `None` uses the configured page size
    pub async fn transactions(
        &self,
        user_id: UserId,
        limit: Option<i64>,
    ) -> LedgerResult<Vec<Transaction>> {
        self.ensure_user(user_id).await?;

        let limit = limit.unwrap_or(self.config.history_limit).max(0);
        self.store.list_transactions(user_id, limit).await
    }

    async fn deposit_in(
        tx: &mut S::Tx,
        user_id: UserId,
        amount: Decimal,
        comment: Option<String>,
    ) -> LedgerResult<Balance> {
        let balance = store::get_or_create(tx, user_id).await?;
        let updated = store::increment(tx, &balance, amount).await?;
        tx.append_transaction(NewTransaction::deposit(user_id, amount, comment))
            .await?;
        Ok(updated)
    }

    async fn withdraw_in(
        tx: &mut S::Tx,
        user_id: UserId,
        amount: Decimal,
        comment: Option<String>,
    ) -> LedgerResult<Balance> {
        let balance = Self::lock_source(tx, user_id, amount).await?;
        let updated = store::decrement(tx, &balance, amount).await?;
        tx.append_transaction(NewTransaction::withdraw(user_id, amount, comment))
            .await?;
        Ok(updated)
    }

    async fn transfer_in(
        tx: &mut S::Tx,
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Decimal,
        comment: Option<String>,
    ) -> LedgerResult<(Balance, Balance)> {
        let (source, destination) = if from_user_id < to_user_id {
            let source = Self::lock_source(tx, from_user_id, amount).await?;
            let destination = store::get_or_create(tx, to_user_id).await?;
            (source, destination)
        } else {
            let destination = store::get_or_create(tx, to_user_id).await?;
            let source = Self::lock_source(tx, from_user_id, amount).await?;
            (source, destination)
        };

        let from = store::decrement(tx, &source, amount).await?;
        let to = store::increment(tx, &destination, amount).await?;

        for entry in NewTransaction::transfer_pair(from_user_id, to_user_id, amount, comment) {
            tx.append_transaction(entry).await?;
        }

        Ok((from, to))
    }

    /// Lock a balance that is about to be debited and check it covers `amount`
    async fn lock_source(tx: &mut S::Tx, user_id: UserId, amount: Decimal) -> LedgerResult<Balance> {
        let balance = store::locked_get(tx, user_id).await?;
        store::ensure_sufficient(user_id, balance, amount)
    }

    /// Checked before the unit of work opens. Users are never deleted, so the
    /// answer cannot change before the balance rows are locked.
    async fn ensure_user(&self, user_id: UserId) -> LedgerResult<()> {
        if self.users.user_exists(user_id).await? {
            Ok(())
        } else {
            Err(LedgerError::UserNotFound(user_id))
        }
    }

    /// Amounts are validated at the request boundary too; the engine repeats the
    /// check because its arithmetic assumes strictly positive, storable values.
    fn validate_amount(&self, amount: Decimal) -> LedgerResult<()> {
        if amount <= Decimal::ZERO
            || amount > self.config.max_amount
            || amount.normalize().scale() > self.config.max_amount_scale
        {
            return Err(LedgerError::InvalidAmount(amount));
        }
        Ok(())
    }
}

/// End a unit of work: commit on success, roll back on failure
async fn finish<T, R>(tx: T, outcome: LedgerResult<R>) -> LedgerResult<R>
where
    T: StoreTransaction,
{
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                log::error!("Rollback failed after {}: {}", err, rollback_err);
            }
            if matches!(err, LedgerError::InsufficientFunds { .. }) {
                log::warn!("Rejected ledger operation: {}", err);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryLedgerStore, MemoryUserDirectory};
    use crate::ledger::TransactionType;
    use rust_decimal_macros::dec;

    fn manager(users: &[UserId]) -> (LedgerManager<MemoryLedgerStore>, MemoryLedgerStore) {
        let store = MemoryLedgerStore::new();
        let directory = Arc::new(MemoryUserDirectory::with_users(users.iter().copied()));
        (LedgerManager::new(store.clone(), directory), store)
    }

    #[tokio::test]
    async fn test_deposit_into_fresh_user() {
        let (ledger, store) = manager(&[1]);

        let result = ledger
            .deposit(1, dec!(500.00), Some("card top-up".to_string()))
            .await
            .unwrap();
        assert_eq!(
            result,
            BalanceSnapshot {
                user_id: 1,
                balance: dec!(500.00)
            }
        );

        let log = store.transaction_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, TransactionType::Deposit);
        assert_eq!(log[0].amount, dec!(500.00));
        assert_eq!(log[0].comment.as_deref(), Some("card top-up"));
    }

    #[tokio::test]
    async fn test_withdraw_without_balance_is_insufficient() {
        let (ledger, store) = manager(&[1]);

        let err = ledger.withdraw(1, dec!(200.00), None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { user_id: 1, .. }));

        assert!(store.balance_rows(1).is_empty());
        assert!(store.transaction_log().is_empty());
        assert_eq!(ledger.get_balance(1).await.unwrap().balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_transfer_in_both_lock_orders() {
        let (ledger, _) = manager(&[1, 2]);
        ledger.deposit(2, dec!(100.00), None).await.unwrap();

        // Sender has the higher id: recipient is locked first
        let receipt = ledger.transfer(2, 1, dec!(60.00), None).await.unwrap();
        assert_eq!(receipt.from_balance, dec!(40.00));
        assert_eq!(receipt.to_balance, dec!(60.00));

        // Sender has the lower id
        let receipt = ledger.transfer(1, 2, dec!(10.00), None).await.unwrap();
        assert_eq!(receipt.from_balance, dec!(50.00));
        assert_eq!(receipt.to_balance, dec!(50.00));
    }

    #[tokio::test]
    async fn test_failed_transfer_rolls_back_recipient_provisioning() {
        let (ledger, store) = manager(&[1, 2]);
        ledger.deposit(2, dec!(10.00), None).await.unwrap();

        // Recipient (id 1) is provisioned before the sender is checked, then rolled back
        let err = ledger.transfer(2, 1, dec!(10.01), None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { user_id: 2, .. }));
        assert!(store.balance_rows(1).is_empty());
        assert_eq!(store.transaction_log().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_amounts_rejected_before_any_work() {
        let (ledger, store) = manager(&[1]);

        for amount in [dec!(0), dec!(-5.00), dec!(1.001)] {
            let err = ledger.deposit(1, amount, None).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)), "{amount}");
        }
        assert!(store.balance_rows(1).is_empty());

        // Trailing zeros do not count as precision
        ledger.deposit(1, dec!(1.500), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_amounts_beyond_column_ceiling_rejected() {
        let (ledger, store) = manager(&[1, 2]);
        let ceiling = crate::ledger::STORABLE_AMOUNT_CEILING;

        for amount in [dec!(100000000000000), ceiling + dec!(0.01), Decimal::MAX] {
            let err = ledger.deposit(1, amount, None).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)), "{amount}");
            assert_eq!(err.class(), crate::ledger::ErrorClass::InvalidInput);

            let err = ledger.transfer(1, 2, amount, None).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)), "{amount}");
        }
        assert!(store.balance_rows(1).is_empty());
        assert!(store.transaction_log().is_empty());

        let snapshot = ledger.deposit(1, ceiling, None).await.unwrap();
        assert_eq!(snapshot.balance, ceiling);
    }

    #[tokio::test]
    async fn test_deposit_past_balance_ceiling_fails_cleanly() {
        let (ledger, store) = manager(&[1]);
        let ceiling = crate::ledger::STORABLE_AMOUNT_CEILING;
        ledger.deposit(1, ceiling, None).await.unwrap();

        let err = ledger.deposit(1, dec!(0.01), None).await.unwrap_err();
        assert!(matches!(err, LedgerError::ConstraintViolation(_)));
        assert_eq!(store.balance_rows(1)[0].balance, ceiling);
        assert_eq!(store.transaction_log().len(), 1);
    }

    #[tokio::test]
    async fn test_self_transfer_rejected() {
        let (ledger, _) = manager(&[1]);
        ledger.deposit(1, dec!(10.00), None).await.unwrap();

        let err = ledger.transfer(1, 1, dec!(5.00), None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransfer(_)));
    }

    #[tokio::test]
    async fn test_history_uses_configured_limit() {
        let store = MemoryLedgerStore::new();
        let ledger = LedgerManager::with_config(
            store,
            Arc::new(MemoryUserDirectory::with_users([1])),
            LedgerConfig {
                history_limit: 2,
                ..LedgerConfig::default()
            },
        );
        for _ in 0..3 {
            ledger.deposit(1, dec!(1.00), None).await.unwrap();
        }

        assert_eq!(ledger.transactions(1, None).await.unwrap().len(), 2);
        assert_eq!(ledger.transactions(1, Some(10)).await.unwrap().len(), 3);
        assert!(matches!(
            ledger.transactions(5, None).await,
            Err(LedgerError::UserNotFound(5))
        ));
    }
}
