use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::chain::poll::PollPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub interval: Duration,
    pub page_size: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            page_size: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Wait between a confirmation request and the first chain lookup.
    pub confirmation_delay: Duration,
    /// Lookups allowed before a deposit is abandoned.
    pub max_attempts: i32,
    pub poll: PollPolicy,
    pub transaction_limit: usize,
    pub recovery_interval: Duration,
    pub queue_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            confirmation_delay: Duration::from_secs(60),
            max_attempts: 5,
            poll: PollPolicy::default(),
            transaction_limit: 10,
            recovery_interval: Duration::from_secs(60),
            queue_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayoutConfig {
    pub retry_interval: Duration,
    pub poll_interval: Duration,
    /// `None` keeps resending until the transfer is observed on chain.
    pub max_attempts: Option<u32>,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(120),
            poll_interval: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub close_grace: Duration,
    /// Flat network fee withheld from every payout, in nanotons.
    pub fee: u64,
    pub payout: PayoutConfig,
    pub poll: PollPolicy,
    pub transaction_limit: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            close_grace: Duration::from_secs(60),
            fee: 7_000_000,
            payout: PayoutConfig::default(),
            poll: PollPolicy::default(),
            transaction_limit: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bank_address: String,
    pub snapshot: SnapshotConfig,
    pub reconciler: ReconcilerConfig,
    pub settlement: SettlementConfig,
}

impl EngineConfig {
    pub fn new(bank_address: impl Into<String>) -> Self {
        Self {
            bank_address: bank_address.into(),
            snapshot: SnapshotConfig::default(),
            reconciler: ReconcilerConfig::default(),
            settlement: SettlementConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub redis_url: String,
    pub tonapi_url: String,
    pub tonapi_token: Option<String>,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let bank_address = required("BANK_ADDRESS")?;

        let mut engine = EngineConfig::new(bank_address);

        engine.snapshot.interval = secs_or("SNAPSHOT_INTERVAL_SECS", engine.snapshot.interval)?;
        engine.snapshot.page_size = parse_or("PAGE_SIZE", engine.snapshot.page_size)?;
        if engine.snapshot.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "PAGE_SIZE",
                value: "0".into(),
            });
        }

        let poll = PollPolicy {
            retries: parse_or("POLL_RETRIES", PollPolicy::default().retries)?,
            backoff: secs_or("POLL_BACKOFF_SECS", PollPolicy::default().backoff)?,
            call_timeout: secs_or("POLL_TIMEOUT_SECS", PollPolicy::default().call_timeout)?,
        };
        let transaction_limit = parse_or("TRANSACTION_LIMIT", 10usize)?;

        let reconciler = &mut engine.reconciler;
        reconciler.confirmation_delay =
            secs_or("CONFIRMATION_DELAY_SECS", reconciler.confirmation_delay)?;
        reconciler.max_attempts = parse_or("MAX_DEPOSIT_ATTEMPTS", reconciler.max_attempts)?;
        reconciler.recovery_interval =
            secs_or("RECOVERY_INTERVAL_SECS", reconciler.recovery_interval)?;
        reconciler.poll = poll;
        reconciler.transaction_limit = transaction_limit;

        let settlement = &mut engine.settlement;
        settlement.close_grace = secs_or("CLOSE_GRACE_SECS", settlement.close_grace)?;
        settlement.fee = parse_or("PAYOUT_FEE", settlement.fee)?;
        settlement.payout.retry_interval =
            secs_or("PAYOUT_RETRY_SECS", settlement.payout.retry_interval)?;
        settlement.payout.poll_interval =
            secs_or("PAYOUT_POLL_SECS", settlement.payout.poll_interval)?;
        settlement.payout.max_attempts = match env::var("MAX_PAYOUT_ATTEMPTS") {
            Ok(raw) => Some(parse_value("MAX_PAYOUT_ATTEMPTS", &raw)?),
            Err(_) => None,
        };
        settlement.poll = poll;
        settlement.transaction_limit = transaction_limit;

        Ok(Self {
            database_url,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 5u32)?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            tonapi_url: env::var("TONAPI_URL").unwrap_or_else(|_| "https://tonapi.io".to_string()),
            tonapi_token: env::var("TONAPI_TOKEN").ok().filter(|t| !t.is_empty()),
            engine,
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn secs_or(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(raw) => parse_value::<u64>(key, &raw).map(Duration::from_secs),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_market_constants() {
        let config = EngineConfig::new("EQbank");
        assert_eq!(config.snapshot.page_size, 4);
        assert_eq!(config.snapshot.interval, Duration::from_secs(5));
        assert_eq!(config.reconciler.max_attempts, 5);
        assert_eq!(config.settlement.fee, 7_000_000);
        assert!(config.settlement.payout.max_attempts.is_none());
    }

    #[test]
    fn parse_value_reports_key() {
        let err = parse_value::<u64>("PAGE_SIZE", "four").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PAGE_SIZE", .. }));
        assert_eq!(parse_value::<u64>("PAGE_SIZE", " 8 ").unwrap(), 8);
    }
}
