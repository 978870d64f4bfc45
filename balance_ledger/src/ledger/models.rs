//! Ledger data models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// User ID type
pub type UserId = i64;

/// Balance row (one per user)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub id: i64,
    pub user_id: UserId,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of balance-affecting event recorded in the transaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    TransferOut,
    TransferIn,
}

impl TransactionType {
    /// Whether entries of this kind reference a counterparty
    pub fn is_transfer(self) -> bool {
        matches!(self, TransactionType::TransferOut | TransactionType::TransferIn)
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Deposit => write!(f, "deposit"),
            TransactionType::Withdraw => write!(f, "withdraw"),
            TransactionType::TransferOut => write!(f, "transfer_out"),
            TransactionType::TransferIn => write!(f, "transfer_in"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = UnknownTransactionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdraw" => Ok(TransactionType::Withdraw),
            "transfer_out" => Ok(TransactionType::TransferOut),
            "transfer_in" => Ok(TransactionType::TransferIn),
            other => Err(UnknownTransactionType(other.to_string())),
        }
    }
}

/// Returned when a stored transaction type is not one of the four known kinds
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transaction type '{0}'")]
pub struct UnknownTransactionType(pub String);

/// Immutable transaction log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: Decimal,
    pub comment: Option<String>,
    pub related_user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Transaction entry that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub kind: TransactionType,
    pub amount: Decimal,
    pub comment: Option<String>,
    pub related_user_id: Option<UserId>,
}

impl NewTransaction {
    pub fn deposit(user_id: UserId, amount: Decimal, comment: Option<String>) -> Self {
        Self {
            user_id,
            kind: TransactionType::Deposit,
            amount,
            comment,
            related_user_id: None,
        }
    }

    pub fn withdraw(user_id: UserId, amount: Decimal, comment: Option<String>) -> Self {
        Self {
            user_id,
            kind: TransactionType::Withdraw,
            amount,
            comment,
            related_user_id: None,
        }
    }

    /// Both legs of a transfer: `transfer_out` for the sender, `transfer_in` for the recipient
    pub fn transfer_pair(
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Decimal,
        comment: Option<String>,
    ) -> [Self; 2] {
        [
            Self {
                user_id: from_user_id,
                kind: TransactionType::TransferOut,
                amount,
                comment: comment.clone(),
                related_user_id: Some(to_user_id),
            },
            Self {
                user_id: to_user_id,
                kind: TransactionType::TransferIn,
                amount,
                comment,
                related_user_id: Some(from_user_id),
            },
        ]
    }
}

/// Result of deposit, withdraw and balance inquiries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub user_id: UserId,
    pub balance: Decimal,
}

/// Result of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub from_balance: Decimal,
    pub to_balance: Decimal,
}
