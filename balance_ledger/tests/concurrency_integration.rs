//! Concurrency tests for the ledger engine.
//!
//! Many tasks hit the same balances at once on a multi-threaded runtime.
//! The row locks must serialize them so no update is lost, no balance goes
//! negative, first-touch provisioning yields exactly one row, and opposite
//! transfers between the same users never deadlock.

use balance_ledger::db::{MemoryLedgerStore, MemoryUserDirectory};
use balance_ledger::ledger::{LedgerError, LedgerManager, TransactionType, UserId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

type SharedLedger = Arc<LedgerManager<MemoryLedgerStore>>;

fn setup_ledger(users: impl IntoIterator<Item = UserId>) -> (SharedLedger, MemoryLedgerStore) {
    let store = MemoryLedgerStore::with_lock_timeout(Duration::from_secs(10));
    let directory = MemoryUserDirectory::with_users(users);
    let ledger = LedgerManager::new(store.clone(), Arc::new(directory));
    (Arc::new(ledger), store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_to_fresh_user() {
    let (ledger, store) = setup_ledger([1]);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.deposit(1, dec!(10.00), None).await })
        })
        .collect();

    for handle in handles {
        handle
            .await
            .expect("task panicked")
            .expect("Deposit should succeed");
    }

    let rows = store.balance_rows(1);
    assert_eq!(rows.len(), 1, "Exactly one balance row");
    assert_eq!(rows[0].balance, dec!(100.00));

    let entries = store.transaction_log();
    assert_eq!(entries.len(), 10);
    assert!(entries.iter().all(|e| e.kind == TransactionType::Deposit));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_transfers_provision_one_row() {
    let senders: Vec<UserId> = (1..=8).collect();
    let recipient: UserId = 5; // in the middle, so both lock orders occur
    let (ledger, store) = setup_ledger(senders.iter().copied().chain([100]));

    for &sender in &senders {
        if sender != recipient {
            ledger.deposit(sender, dec!(25.00), None).await.unwrap();
        }
    }

    // A fresh recipient that no one has touched yet
    let handles: Vec<_> = senders
        .iter()
        .copied()
        .filter(|&s| s != recipient)
        .map(|sender| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.transfer(sender, 100, dec!(12.50), None).await })
        })
        .collect();

    let transfers = handles.len();
    for handle in handles {
        handle.await.unwrap().expect("Transfer should succeed");
    }

    let rows = store.balance_rows(100);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].balance, dec!(12.50) * Decimal::from(transfers));

    let incoming = store
        .transaction_log()
        .into_iter()
        .filter(|e| e.kind == TransactionType::TransferIn && e.user_id == 100)
        .count();
    assert_eq!(incoming, transfers);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() {
    let (ledger, store) = setup_ledger([1, 2]);
    ledger.deposit(1, dec!(1000.00), None).await.unwrap();
    ledger.deposit(2, dec!(1000.00), None).await.unwrap();

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let ledger = ledger.clone();
            let (from, to) = if i % 2 == 0 { (1, 2) } else { (2, 1) };
            tokio::spawn(async move { ledger.transfer(from, to, dec!(3.00), None).await })
        })
        .collect();

    let all = async {
        for handle in handles {
            handle.await.unwrap().expect("Transfer should succeed");
        }
    };
    tokio::time::timeout(Duration::from_secs(30), all)
        .await
        .expect("Opposite transfers should not deadlock");

    let first = store.balance_rows(1)[0].balance;
    let second = store.balance_rows(2)[0].balance;
    assert_eq!(first + second, dec!(2000.00));
    // 25 transfers each way
    assert_eq!(first, dec!(1000.00));
    assert_eq!(second, dec!(1000.00));
    assert_eq!(store.transaction_log().len(), 2 + 50 * 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() {
    let (ledger, store) = setup_ledger([1]);
    ledger.deposit(1, dec!(100.00), None).await.unwrap();

    let handles: Vec<_> = (0..25)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.withdraw(1, dec!(10.00), None).await })
        })
        .collect();

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(snapshot) => {
                assert!(snapshot.balance >= Decimal::ZERO);
                succeeded += 1;
            }
            Err(LedgerError::InsufficientFunds { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(rejected, 15);
    assert_eq!(store.balance_rows(1)[0].balance, Decimal::ZERO);

    let withdrawals = store
        .transaction_log()
        .into_iter()
        .filter(|e| e.kind == TransactionType::Withdraw)
        .count();
    assert_eq!(withdrawals, 10, "Rejected withdrawals leave no entry");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ring_of_transfers_conserves_total() {
    let users: Vec<UserId> = (1..=6).collect();
    let (ledger, store) = setup_ledger(users.clone());
    for &user in &users {
        ledger.deposit(user, dec!(50.00), None).await.unwrap();
    }

    let handles: Vec<_> = (0..60)
        .map(|i| {
            let ledger = ledger.clone();
            let from = users[i % users.len()];
            let to = users[(i * 5 + 1) % users.len()];
            tokio::spawn(async move {
                if from == to {
                    return Ok(None);
                }
                ledger.transfer(from, to, dec!(7.25), None).await.map(Some)
            })
        })
        .collect();

    let mut completed = 0usize;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(Some(receipt)) => {
                assert!(receipt.from_balance >= Decimal::ZERO);
                completed += 1;
            }
            Ok(None) | Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    let total: Decimal = users
        .iter()
        .map(|&u| store.balance_rows(u)[0].balance)
        .sum();
    assert_eq!(total, dec!(300.00));

    let transfer_entries = store
        .transaction_log()
        .into_iter()
        .filter(|e| e.kind.is_transfer())
        .count();
    assert_eq!(transfer_entries, completed * 2);
}
