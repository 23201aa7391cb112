//! Per-position exit lifecycle state.

use crate::domain::{Decimal, ParseEnumError, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Phase of the exit state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitPhase {
    Open,
    #[serde(rename = "TP1_DONE")]
    Tp1Done,
    #[serde(rename = "TP2_DONE")]
    Tp2Done,
    #[serde(rename = "TP3_DONE")]
    Tp3Done,
    TrailingActive,
    Exited,
}

impl ExitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitPhase::Open => "OPEN",
            ExitPhase::Tp1Done => "TP1_DONE",
            ExitPhase::Tp2Done => "TP2_DONE",
            ExitPhase::Tp3Done => "TP3_DONE",
            ExitPhase::TrailingActive => "TRAILING_ACTIVE",
            ExitPhase::Exited => "EXITED",
        }
    }

    /// Phases in which the break-even stop floor is armed.
    pub fn has_stop_floor(&self) -> bool {
        matches!(
            self,
            ExitPhase::Tp1Done | ExitPhase::Tp2Done | ExitPhase::Tp3Done
        )
    }
}

impl fmt::Display for ExitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitPhase {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(ExitPhase::Open),
            "TP1_DONE" => Ok(ExitPhase::Tp1Done),
            "TP2_DONE" => Ok(ExitPhase::Tp2Done),
            "TP3_DONE" => Ok(ExitPhase::Tp3Done),
            "TRAILING_ACTIVE" => Ok(ExitPhase::TrailingActive),
            "EXITED" => Ok(ExitPhase::Exited),
            other => Err(ParseEnumError::new("ExitPhase", other)),
        }
    }
}

/// FSM state row, created lazily on first evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitState {
    pub position_id: String,
    pub phase: ExitPhase,
    /// High-water mark; only moves up, only while trailing is active.
    pub hwm_price: Option<Decimal>,
    pub stop_floor_price: Option<Decimal>,
    /// ATR as a fraction of price, written by the market-data side.
    pub cached_atr: Option<Decimal>,
    pub stop_floor_breach_ticks: i32,
    pub trailing_breach_ticks: i32,
    pub last_avg_price: Option<Decimal>,
    pub updated_ts: TimeMs,
}

impl ExitState {
    pub fn new(position_id: impl Into<String>, avg_price: Decimal, now: TimeMs) -> Self {
        ExitState {
            position_id: position_id.into(),
            phase: ExitPhase::Open,
            hwm_price: None,
            stop_floor_price: None,
            cached_atr: None,
            stop_floor_breach_ticks: 0,
            trailing_breach_ticks: 0,
            last_avg_price: Some(avg_price),
            updated_ts: now,
        }
    }
}
