//! Engine configuration.

use std::time::Duration;

use loyalty_common::{constants, LoyaltyError, Result};

/// Ledger database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/loyalty".to_string(),
            max_connections: 20,
        }
    }
}

/// Accrual poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Number of workers, which is also the batch size of one cycle.
    pub workers: usize,
    /// Pause between two cycles.
    pub interval: Duration,
    /// Deadline for one call to the accrual authority.
    pub request_timeout: Duration,
    /// Suspension applied when a rate-limit reply has no `Retry-After`.
    pub default_retry_after: Duration,
    /// How long shutdown waits for in-flight work.
    pub drain_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            workers: constants::DEFAULT_POLLER_WORKERS,
            interval: constants::poll_interval(),
            request_timeout: constants::accrual_call_timeout(),
            default_retry_after: constants::default_retry_after(),
            drain_timeout: constants::drain_timeout(),
        }
    }
}

/// Main engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Base address of the accrual authority.
    pub accrual_address: String,
    /// Poller configuration.
    pub poller: PollerConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            accrual_address: "http://localhost:8080".to_string(),
            poller: PollerConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from environment variables that are set.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Override fields from a variable lookup. Unparseable values are ignored.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URI") {
            self.database.url = url;
        }

        if let Some(addr) = lookup("ACCRUAL_SYSTEM_ADDRESS") {
            self.accrual_address = addr;
        }

        if let Some(workers) = lookup("POLLER_WORKERS") {
            if let Ok(workers) = workers.parse() {
                self.poller.workers = workers;
            }
        }

        if let Some(ms) = lookup("POLLER_INTERVAL_MS") {
            if let Ok(ms) = ms.parse() {
                self.poller.interval = Duration::from_millis(ms);
            }
        }

        if let Some(ms) = lookup("ACCRUAL_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.poller.request_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(LoyaltyError::Configuration(
                "Database URI cannot be empty".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(LoyaltyError::Configuration(
                "Database pool needs at least one connection".to_string(),
            ));
        }

        if self.accrual_address.is_empty() {
            return Err(LoyaltyError::Configuration(
                "Accrual system address cannot be empty".to_string(),
            ));
        }

        if self.poller.workers == 0 {
            return Err(LoyaltyError::Configuration(
                "Poller needs at least one worker".to_string(),
            ));
        }

        if self.poller.interval.is_zero() || self.poller.request_timeout.is_zero() {
            return Err(LoyaltyError::Configuration(
                "Poller interval and request timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poller.workers, 10);
        assert_eq!(config.poller.default_retry_after, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_config() {
        let mut config = EngineConfig::default();
        config.poller.workers = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.accrual_address.clear();
        assert!(matches!(
            config.validate(),
            Err(LoyaltyError::Configuration(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DATABASE_URI", "postgres://db/loyalty"),
            ("ACCRUAL_SYSTEM_ADDRESS", "http://accrual:9000"),
            ("POLLER_WORKERS", "4"),
            ("POLLER_INTERVAL_MS", "250"),
            ("ACCRUAL_TIMEOUT_MS", "nope"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.url, "postgres://db/loyalty");
        assert_eq!(config.accrual_address, "http://accrual:9000");
        assert_eq!(config.poller.workers, 4);
        assert_eq!(config.poller.interval, Duration::from_millis(250));
        assert_eq!(config.poller.request_timeout, Duration::from_secs(5));
    }
}
