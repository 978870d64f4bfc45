/// Property-based tests for the ledger engine using proptest
///
/// Random sequences of deposits, withdrawals and transfers are replayed
/// against the engine and against a plain in-memory model of the balances.
/// After every sequence the two must agree, no balance may be negative, and
/// the transaction log must explain every balance.
use balance_ledger::db::{MemoryLedgerStore, MemoryUserDirectory};
use balance_ledger::ledger::{LedgerError, LedgerManager, TransactionType, UserId};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

const USERS: [UserId; 4] = [1, 2, 3, 4];

#[derive(Debug, Clone)]
enum Op {
    Deposit(UserId, Decimal),
    Withdraw(UserId, Decimal),
    Transfer(UserId, UserId, Decimal),
}

// Strategy to generate an amount between 0.01 and 500.00 with two decimals
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=50_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn user_strategy() -> impl Strategy<Value = UserId> {
    prop::sample::select(USERS.to_vec())
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (user_strategy(), amount_strategy()).prop_map(|(u, a)| Op::Deposit(u, a)),
        (user_strategy(), amount_strategy()).prop_map(|(u, a)| Op::Withdraw(u, a)),
        (user_strategy(), user_strategy(), amount_strategy())
            .prop_filter("sender and recipient must differ", |(f, t, _)| f != t)
            .prop_map(|(f, t, a)| Op::Transfer(f, t, a)),
    ]
}

/// Replay `ops` and return (engine balances, model balances, store)
fn replay(ops: &[Op]) -> (HashMap<UserId, Decimal>, HashMap<UserId, Decimal>, MemoryLedgerStore) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let store = MemoryLedgerStore::new();
        let ledger = LedgerManager::new(
            store.clone(),
            Arc::new(MemoryUserDirectory::with_users(USERS)),
        );
        let mut model: HashMap<UserId, Decimal> = USERS.iter().map(|&u| (u, Decimal::ZERO)).collect();

        for op in ops {
            match *op {
                Op::Deposit(user, amount) => {
                    ledger.deposit(user, amount, None).await.unwrap();
                    *model.get_mut(&user).unwrap() += amount;
                }
                Op::Withdraw(user, amount) => {
                    let result = ledger.withdraw(user, amount, None).await;
                    if model[&user] >= amount {
                        assert_eq!(result.unwrap().balance, model[&user] - amount);
                        *model.get_mut(&user).unwrap() -= amount;
                    } else {
                        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
                    }
                }
                Op::Transfer(from, to, amount) => {
                    let result = ledger.transfer(from, to, amount, None).await;
                    if model[&from] >= amount {
                        result.unwrap();
                        *model.get_mut(&from).unwrap() -= amount;
                        *model.get_mut(&to).unwrap() += amount;
                    } else {
                        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
                    }
                }
            }
        }

        let mut engine = HashMap::new();
        for &user in &USERS {
            engine.insert(user, ledger.get_balance(user).await.unwrap().balance);
        }
        (engine, model, store)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_engine_matches_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (engine, model, _) = replay(&ops);
        prop_assert_eq!(engine, model);
    }

    #[test]
    fn test_balances_never_negative(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (_, _, store) = replay(&ops);
        for user in USERS {
            for row in store.balance_rows(user) {
                prop_assert!(row.balance >= Decimal::ZERO);
            }
            prop_assert!(store.balance_rows(user).len() <= 1, "At most one row per user");
        }
    }

    #[test]
    fn test_transfers_conserve_deposited_total(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (engine, _, store) = replay(&ops);
        let log = store.transaction_log();

        let deposited: Decimal = log
            .iter()
            .filter(|e| e.kind == TransactionType::Deposit)
            .map(|e| e.amount)
            .sum();
        let withdrawn: Decimal = log
            .iter()
            .filter(|e| e.kind == TransactionType::Withdraw)
            .map(|e| e.amount)
            .sum();

        let total: Decimal = engine.values().copied().sum();
        prop_assert_eq!(total, deposited - withdrawn);
    }

    #[test]
    fn test_log_explains_every_balance(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (engine, _, store) = replay(&ops);
        let log = store.transaction_log();

        for user in USERS {
            let replayed: Decimal = log
                .iter()
                .filter(|e| e.user_id == user)
                .map(|e| match e.kind {
                    TransactionType::Deposit | TransactionType::TransferIn => e.amount,
                    TransactionType::Withdraw | TransactionType::TransferOut => -e.amount,
                })
                .sum();
            prop_assert_eq!(replayed, engine[&user]);
        }

        let outgoing = log.iter().filter(|e| e.kind == TransactionType::TransferOut).count();
        let incoming = log.iter().filter(|e| e.kind == TransactionType::TransferIn).count();
        prop_assert_eq!(outgoing, incoming);
    }
}
