use dotenvy::dotenv;
use std::env;

use crate::error::AppError;

/// Which backend the persistence adapter talks to.
///
/// `Memory` exists for local development and tests; production deployments
/// run against Redis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub store_backend: StoreBackend,
    /// Interval between heartbeat probes; a session that has not acknowledged
    /// the previous probe when the next one fires is pruned.
    pub heartbeat_interval_secs: u64,
    /// Interval of the background alert-condition sweep.
    pub alert_sweep_interval_secs: u64,
    /// Retention window for per-product change history, in days.
    pub history_retention_days: i64,
    /// Hard cap on entries kept per product history list.
    pub history_max_entries: usize,
    /// Threshold applied to newly tracked products unless overridden.
    pub default_low_stock_threshold: i64,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{name} invalid: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("redis") | Err(_) => StoreBackend::Redis,
            Ok(other) => {
                return Err(AppError::Config(format!("STORE_BACKEND invalid: {other:?}")))
            }
        };

        Ok(Self {
            port: parse_var("PORT", 3000)?,
            redis_url,
            store_backend,
            heartbeat_interval_secs: parse_var("HEARTBEAT_INTERVAL_SECS", 30)?,
            alert_sweep_interval_secs: parse_var("ALERT_SWEEP_INTERVAL_SECS", 60)?,
            history_retention_days: parse_var("HISTORY_RETENTION_DAYS", 30)?,
            history_max_entries: parse_var("HISTORY_MAX_ENTRIES", 200)?,
            default_low_stock_threshold: parse_var("DEFAULT_LOW_STOCK_THRESHOLD", 10)?,
        })
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            port: 3000,
            redis_url: "redis://127.0.0.1:6379/0".into(),
            store_backend: StoreBackend::Memory,
            heartbeat_interval_secs: 30,
            alert_sweep_interval_secs: 60,
            history_retention_days: 30,
            history_max_entries: 200,
            default_low_stock_threshold: 10,
        }
    }
}
