//! Exit events and evaluation signals.

use crate::domain::{Decimal, ExitPhase, ParseEnumError, ReasonCode, Symbol, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Reason code recorded when no automatic intent explains a closure.
pub const MANUAL_REASON: &str = "MANUAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitSource {
    AutoExit,
    Manual,
}

impl ExitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitSource::AutoExit => "AUTO_EXIT",
            ExitSource::Manual => "MANUAL",
        }
    }
}

impl FromStr for ExitSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTO_EXIT" => Ok(ExitSource::AutoExit),
            "MANUAL" => Ok(ExitSource::Manual),
            other => Err(ParseEnumError::new("ExitSource", other)),
        }
    }
}

/// Closure of a position. At most one per position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitEvent {
    pub exit_event_id: String,
    pub position_id: String,
    pub account_id: String,
    pub symbol: Symbol,
    pub exit_ts: TimeMs,
    pub exit_qty: i64,
    pub exit_avg_price: Decimal,
    pub entry_avg_price: Decimal,
    pub reason_code: String,
    pub source: ExitSource,
    pub intent_id: Option<String>,
    pub exit_profile_id: Option<String>,
    pub realized_pnl: Decimal,
    pub realized_pnl_pct: Decimal,
    pub created_ts: TimeMs,
}

/// A fired trigger, recorded for later analysis whether or not it produced an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitSignal {
    pub signal_id: String,
    pub position_id: String,
    pub reason_code: ReasonCode,
    pub phase: ExitPhase,
    pub trigger_price: Decimal,
    pub pnl_pct: Decimal,
    pub qty: i64,
    pub intent_created: bool,
    pub evaluated_ts: TimeMs,
}
