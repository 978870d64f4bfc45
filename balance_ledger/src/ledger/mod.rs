//! Ledger module: per-user balances with an append-only transaction log.
//!
//! This module implements:
//! - Deposits, withdrawals and transfers, each as one atomic unit of work
//! - Exclusive row locks on every balance that is read before a mutation
//! - Lazy balance provisioning that survives concurrent first-touch races
//! - Deadlock-free transfers through a fixed lock acquisition order
//! - Balance inquiries and transaction history without locking
//!
//! ## Example
//!
//! ```no_run
//! use balance_ledger::db::{Database, DatabaseConfig, PgLedgerStore, PgUserDirectory};
//! use balance_ledger::ledger::LedgerManager;
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig::from_env()?;
//!     let db = Database::new(&config).await?;
//!     let pool = Arc::new(db.pool().clone());
//!
//!     let ledger = LedgerManager::new(
//!         PgLedgerStore::new(pool.clone(), config.lock_timeout()),
//!         Arc::new(PgUserDirectory::new(pool)),
//!     );
//!
//!     let snapshot = ledger.deposit(1, Decimal::new(50000, 2), None).await?;
//!     println!("Balance after deposit: {}", snapshot.balance);
//!
//!     let receipt = ledger.transfer(1, 2, Decimal::new(15000, 2), None).await?;
//!     println!("Sender now has {}", receipt.from_balance);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod errors;
pub mod manager;
pub mod models;
pub mod store;

pub use config::{LedgerConfig, STORABLE_AMOUNT_CEILING};
pub use errors::{ErrorClass, LedgerError, LedgerResult};
pub use manager::{LedgerManager, PgLedgerManager};
pub use models::{
    Balance, BalanceSnapshot, NewTransaction, Transaction, TransactionType, TransferReceipt,
    UnknownTransactionType, UserId,
};
