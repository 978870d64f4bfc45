//! Ledger engine configuration.

use rust_decimal::Decimal;

use crate::db::config::{ConfigError, parse_env_or};

/// Largest scale the `NUMERIC(15, 2)` columns store without rounding
pub const DEFAULT_MAX_AMOUNT_SCALE: u32 = 2;

/// Largest value a `NUMERIC(15, 2)` column holds: 9999999999999.99
pub const STORABLE_AMOUNT_CEILING: Decimal =
    Decimal::from_parts(2_764_472_319, 232_830, 0, false, 2);

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Maximum number of decimal places accepted in an amount
    pub max_amount_scale: u32,

    /// Largest amount accepted in a single operation
    pub max_amount: Decimal,

    /// Default page size for transaction history
    pub history_limit: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_amount_scale: DEFAULT_MAX_AMOUNT_SCALE,
            max_amount: STORABLE_AMOUNT_CEILING,
            history_limit: 50,
        }
    }
}

impl LedgerConfig {
    /// Create configuration from environment variables
    ///
    /// - `LEDGER_MAX_AMOUNT_SCALE`: decimal places accepted (default: 2)
    /// - `LEDGER_MAX_AMOUNT`: largest amount per operation (default: 9999999999999.99)
    /// - `LEDGER_HISTORY_LIMIT`: default history page size (default: 50)
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            max_amount_scale: parse_env_or("LEDGER_MAX_AMOUNT_SCALE", DEFAULT_MAX_AMOUNT_SCALE),
            max_amount: parse_env_or("LEDGER_MAX_AMOUNT", STORABLE_AMOUNT_CEILING),
            history_limit: parse_env_or("LEDGER_HISTORY_LIMIT", 50),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the database schema cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_amount_scale > DEFAULT_MAX_AMOUNT_SCALE {
            return Err(ConfigError::Invalid {
                var: "LEDGER_MAX_AMOUNT_SCALE".to_string(),
                reason: format!(
                    "Amounts are stored with {DEFAULT_MAX_AMOUNT_SCALE} decimal places"
                ),
            });
        }

        if self.max_amount <= Decimal::ZERO || self.max_amount > STORABLE_AMOUNT_CEILING {
            return Err(ConfigError::Invalid {
                var: "LEDGER_MAX_AMOUNT".to_string(),
                reason: format!("Must be greater than 0 and at most {STORABLE_AMOUNT_CEILING}"),
            });
        }

        if self.history_limit <= 0 {
            return Err(ConfigError::Invalid {
                var: "LEDGER_HISTORY_LIMIT".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}
