//! CLI configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use balance_ledger::db::{ConfigError, DatabaseConfig};
use balance_ledger::ledger::LedgerConfig;

/// Complete CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Ledger engine configuration
    pub ledger: LedgerConfig,
}

impl CliConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `database_url_override` - Optional database URL override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if the database URL is missing or a value is invalid
    pub fn from_env(database_url_override: Option<String>) -> Result<Self, ConfigError> {
        let database = match database_url_override {
            Some(database_url) => DatabaseConfig::from_env_with_url(database_url)?,
            None => DatabaseConfig::from_env()?,
        };

        let config = CliConfig {
            database,
            ledger: LedgerConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "DATABASE_URL".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        self.database.validate()?;
        self.ledger.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CliConfig {
        CliConfig {
            database: DatabaseConfig {
                database_url: "postgres://ledger@localhost/ledger".to_string(),
                ..DatabaseConfig::development()
            },
            ledger: LedgerConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_empty_database_url_rejected() {
        let mut config = config();
        config.database.database_url = "  ".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_pool_sizes_validated() {
        let mut config = config();
        config.database.max_connections = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_amount_scale_validated() {
        let mut config = config();
        config.ledger.max_amount_scale = 4;
        assert!(config.validate().is_err());
    }
}
