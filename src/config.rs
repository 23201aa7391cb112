use chrono::NaiveTime;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub account_id: String,
    pub broker_api_url: String,
    pub intervals: LoopIntervals,
    /// Quotes older than this are treated as stale.
    pub price_freshness_ms: i64,
    /// Create automatic exit intents as PENDING_APPROVAL instead of NEW.
    pub require_approval: bool,
    pub market_hours: MarketHoursConfig,
}

/// Tick periods of the background loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopIntervals {
    pub exit_eval: Duration,
    pub intent_poll: Duration,
    pub fill_sync: Duration,
    pub order_reconcile: Duration,
    pub holdings_sync: Duration,
    pub intent_reconcile: Duration,
}

impl Default for LoopIntervals {
    fn default() -> Self {
        Self {
            exit_eval: Duration::from_millis(3_000),
            intent_poll: Duration::from_millis(2_000),
            fill_sync: Duration::from_millis(3_000),
            order_reconcile: Duration::from_millis(15_000),
            holdings_sync: Duration::from_millis(20_000),
            intent_reconcile: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketHoursConfig {
    pub enforced: bool,
    pub utc_offset_hours: i32,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            enforced: true,
            utc_offset_hours: 9,
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = required(&env_map, "DATABASE_PATH")?;
        let account_id = required(&env_map, "ACCOUNT_ID")?;
        let broker_api_url = required(&env_map, "BROKER_API_URL")?;

        let defaults = LoopIntervals::default();
        let intervals = LoopIntervals {
            exit_eval: interval(&env_map, "EXIT_EVAL_INTERVAL_MS", defaults.exit_eval)?,
            intent_poll: interval(&env_map, "INTENT_POLL_INTERVAL_MS", defaults.intent_poll)?,
            fill_sync: interval(&env_map, "FILL_SYNC_INTERVAL_MS", defaults.fill_sync)?,
            order_reconcile: interval(
                &env_map,
                "ORDER_RECONCILE_INTERVAL_MS",
                defaults.order_reconcile,
            )?,
            holdings_sync: interval(&env_map, "HOLDINGS_SYNC_INTERVAL_MS", defaults.holdings_sync)?,
            intent_reconcile: interval(
                &env_map,
                "INTENT_RECONCILE_INTERVAL_MS",
                defaults.intent_reconcile,
            )?,
        };

        let price_freshness_ms = env_map
            .get("PRICE_FRESHNESS_MS")
            .map(|s| s.as_str())
            .unwrap_or("10000")
            .parse::<i64>()
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "PRICE_FRESHNESS_MS".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        let require_approval = flag(&env_map, "REQUIRE_APPROVAL", false)?;

        let market_defaults = MarketHoursConfig::default();
        let utc_offset_hours = env_map
            .get("MARKET_UTC_OFFSET_HOURS")
            .map(|s| s.as_str())
            .unwrap_or("9")
            .parse::<i32>()
            .ok()
            .filter(|h| (-12..=14).contains(h))
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "MARKET_UTC_OFFSET_HOURS".to_string(),
                    "must be an hour offset between -12 and 14".to_string(),
                )
            })?;
        let market_hours = MarketHoursConfig {
            enforced: flag(&env_map, "MARKET_HOURS_ENFORCED", market_defaults.enforced)?,
            utc_offset_hours,
            open: clock(&env_map, "MARKET_OPEN", market_defaults.open)?,
            close: clock(&env_map, "MARKET_CLOSE", market_defaults.close)?,
        };
        if market_hours.open >= market_hours.close {
            return Err(ConfigError::InvalidValue(
                "MARKET_CLOSE".to_string(),
                "must be later than MARKET_OPEN".to_string(),
            ));
        }

        Ok(Config {
            port,
            database_path,
            account_id,
            broker_api_url,
            intervals,
            price_freshness_ms,
            require_approval,
            market_hours,
        })
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn interval(
    env_map: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    key.to_string(),
                    "must be a positive number of milliseconds".to_string(),
                )
            }),
    }
}

fn flag(env_map: &HashMap<String, String>, key: &str, default: bool) -> Result<bool, ConfigError> {
    match env_map.get(key).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(ConfigError::InvalidValue(
                key.to_string(),
                format!("must be true or false, got {}", other),
            )),
        },
    }
}

fn clock(
    env_map: &HashMap<String, String>,
    key: &str,
    default: NaiveTime,
) -> Result<NaiveTime, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), format!("must be HH:MM, got {}", raw))
        }),
    }
}
