//! # Balance Ledger
//!
//! Per-user monetary balances with an immutable transaction log.
//!
//! Every deposit, withdrawal and transfer runs as a single unit of work that
//! locks the balance rows it touches, checks its preconditions under that lock,
//! mutates the balances and appends the matching transaction entries. A failed
//! operation leaves no trace; concurrent operations on the same user are
//! serialized by the row lock.
//!
//! ## Core Modules
//!
//! - [`ledger`]: Ledger engine, balance store operations, models and errors
//! - [`db`]: PostgreSQL pool, migrations and the storage adapters the engine runs on
//!
//! ## Example
//!
//! ```
//! use balance_ledger::db::{MemoryLedgerStore, MemoryUserDirectory};
//! use balance_ledger::ledger::LedgerManager;
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), balance_ledger::LedgerError> {
//! let ledger = LedgerManager::new(
//!     MemoryLedgerStore::new(),
//!     Arc::new(MemoryUserDirectory::with_users([1, 2])),
//! );
//!
//! ledger.deposit(1, Decimal::new(50000, 2), None).await?;
//! let receipt = ledger.transfer(1, 2, Decimal::new(15000, 2), None).await?;
//! assert_eq!(receipt.from_balance, Decimal::new(35000, 2));
//! assert_eq!(receipt.to_balance, Decimal::new(15000, 2));
//! # Ok(())
//! # }
//! ```

/// Database access and storage adapters.
pub mod db;

/// Ledger engine, models and errors.
pub mod ledger;

pub use ledger::{
    BalanceSnapshot, LedgerError, LedgerManager, LedgerResult, Transaction, TransactionType,
    TransferReceipt, UserId,
};
