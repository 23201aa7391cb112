//! Domain primitives: TimeMs, Symbol, Side.

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Milliseconds in one calendar day.
pub const DAY_MS: i64 = 86_400_000;

/// Time in milliseconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Alias of [`TimeMs::as_i64`] used at query boundaries.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    pub fn saturating_sub_ms(&self, ms: i64) -> Self {
        TimeMs(self.0.saturating_sub(ms))
    }

    pub fn saturating_add_ms(&self, ms: i64) -> Self {
        TimeMs(self.0.saturating_add(ms))
    }

    /// Elapsed milliseconds since `earlier`; negative if `earlier` is in the future.
    pub fn since(&self, earlier: TimeMs) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Whole days elapsed since `earlier`, never negative.
    pub fn whole_days_since(&self, earlier: TimeMs) -> i64 {
        (self.since(earlier) / DAY_MS).max(0)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }

    /// Midnight of the same calendar day in the given UTC offset.
    pub fn start_of_day(&self, offset: FixedOffset) -> TimeMs {
        let Some(utc) = self.to_datetime() else {
            return *self;
        };
        let local = utc.with_timezone(&offset);
        let midnight = local.date_naive().and_time(NaiveTime::MIN);
        match offset.from_local_datetime(&midnight).single() {
            Some(dt) => TimeMs(dt.timestamp_millis()),
            None => *self,
        }
    }
}

impl fmt::Display for TimeMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Equity ticker symbol (e.g. "005930").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    /// Create a Symbol from a string.
    pub fn new(symbol: impl Into<String>) -> Self {
        Symbol(symbol.into())
    }

    /// Get the symbol as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side sent to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(ParseEnumError::new("Side", other)),
        }
    }
}

/// Failure to parse a stored enum column back into its domain type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
