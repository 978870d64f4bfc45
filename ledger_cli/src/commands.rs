//! CLI subcommands: parsing and execution.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use balance_ledger::db::{Database, PgLedgerStore, PgUserDirectory};
use balance_ledger::ledger::{LedgerConfig, LedgerManager, PgLedgerManager, UserId};
use pico_args::Arguments;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

/// Demo users inserted by `seed`, as (name, email)
const DEMO_USERS: [(&str, &str); 5] = [
    ("Ivan Ivanov", "ivan@example.com"),
    ("Maria Petrova", "maria@example.com"),
    ("Alexey Sidorov", "alex@example.com"),
    ("Elena Kozlova", "elena@example.com"),
    ("Dmitry Volkov", "dmitry@example.com"),
];

/// A parsed subcommand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Migrate,
    Seed,
    Deposit {
        user_id: UserId,
        amount: Decimal,
        comment: Option<String>,
    },
    Withdraw {
        user_id: UserId,
        amount: Decimal,
        comment: Option<String>,
    },
    Transfer {
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Decimal,
        comment: Option<String>,
    },
    Balance {
        user_id: UserId,
    },
    History {
        user_id: UserId,
        limit: Option<i64>,
    },
}

#[derive(Debug, Serialize)]
struct SeededUser {
    id: UserId,
    name: &'static str,
    email: &'static str,
}

impl Command {
    /// Parse the subcommand and its options from the remaining arguments
    ///
    /// Global options must already have been taken out of `pargs`.
    pub fn parse(mut pargs: Arguments) -> anyhow::Result<Self> {
        let Some(name) = pargs.subcommand()? else {
            bail!("missing command");
        };

        let command = match name.as_str() {
            "migrate" => Command::Migrate,
            "seed" => Command::Seed,
            "deposit" => Command::Deposit {
                user_id: pargs.value_from_str("--user")?,
                amount: parse_amount(&mut pargs)?,
                comment: pargs.opt_value_from_str("--comment")?,
            },
            "withdraw" => Command::Withdraw {
                user_id: pargs.value_from_str("--user")?,
                amount: parse_amount(&mut pargs)?,
                comment: pargs.opt_value_from_str("--comment")?,
            },
            "transfer" => Command::Transfer {
                from_user_id: pargs.value_from_str("--from")?,
                to_user_id: pargs.value_from_str("--to")?,
                amount: parse_amount(&mut pargs)?,
                comment: pargs.opt_value_from_str("--comment")?,
            },
            "balance" => Command::Balance {
                user_id: pargs.value_from_str("--user")?,
            },
            "history" => {
                let user_id = pargs.value_from_str("--user")?;
                let limit: Option<i64> = pargs.opt_value_from_str("--limit")?;
                if limit.is_some_and(|l| l <= 0) {
                    bail!("--limit must be greater than 0");
                }
                Command::History { user_id, limit }
            }
            other => bail!("unknown command '{other}'"),
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            bail!("unexpected arguments: {remaining:?}");
        }

        Ok(command)
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Migrate => "migrate",
            Command::Seed => "seed",
            Command::Deposit { .. } => "deposit",
            Command::Withdraw { .. } => "withdraw",
            Command::Transfer { .. } => "transfer",
            Command::Balance { .. } => "balance",
            Command::History { .. } => "history",
        }
    }

    /// Execute the command and return its JSON result
    pub async fn run(
        self,
        db: &Database,
        config: &LedgerConfig,
        lock_timeout: Duration,
    ) -> anyhow::Result<Value> {
        let pool = Arc::new(db.pool().clone());
        let users = PgUserDirectory::new(pool.clone());
        let ledger: PgLedgerManager = LedgerManager::with_config(
            PgLedgerStore::new(pool, lock_timeout),
            Arc::new(users.clone()),
            config.clone(),
        );

        let value = match self {
            Command::Migrate => {
                db.migrate().await.context("Failed to run migrations")?;
                tracing::info!("Migrations applied");
                serde_json::json!({ "migrated": true })
            }
            Command::Seed => {
                let mut seeded = Vec::with_capacity(DEMO_USERS.len());
                for (name, email) in DEMO_USERS {
                    let id = users.upsert_user(name, email).await?;
                    seeded.push(SeededUser { id, name, email });
                }
                tracing::info!("Seeded {} demo users", seeded.len());
                serde_json::to_value(seeded)?
            }
            Command::Deposit {
                user_id,
                amount,
                comment,
            } => serde_json::to_value(ledger.deposit(user_id, amount, comment).await?)?,
            Command::Withdraw {
                user_id,
                amount,
                comment,
            } => serde_json::to_value(ledger.withdraw(user_id, amount, comment).await?)?,
            Command::Transfer {
                from_user_id,
                to_user_id,
                amount,
                comment,
            } => serde_json::to_value(
                ledger
                    .transfer(from_user_id, to_user_id, amount, comment)
                    .await?,
            )?,
            Command::Balance { user_id } => {
                serde_json::to_value(ledger.get_balance(user_id).await?)?
            }
            Command::History { user_id, limit } => {
                serde_json::to_value(ledger.transactions(user_id, limit).await?)?
            }
        };

        Ok(value)
    }
}

/// Amounts must be positive; precision is checked by the ledger against its configuration
fn parse_amount(pargs: &mut Arguments) -> anyhow::Result<Decimal> {
    let amount: Decimal = pargs.value_from_str("--amount")?;
    if amount <= Decimal::ZERO {
        bail!("--amount must be greater than 0");
    }
    Ok(amount)
}
