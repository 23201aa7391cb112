//! Position record guarded by an optimistic-lock version.

use crate::domain::{Decimal, ParseEnumError, Symbol, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closing => "CLOSING",
            PositionStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSING" => Ok(PositionStatus::Closing),
            "CLOSED" => Ok(PositionStatus::Closed),
            other => Err(ParseEnumError::new("PositionStatus", other)),
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the exit engine may act on a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitMode {
    /// Automatic triggers and manual intents.
    Enabled,
    /// Only operator-created intents.
    ManualOnly,
    /// Nothing, not even manual intents.
    Disabled,
}

impl ExitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitMode::Enabled => "ENABLED",
            ExitMode::ManualOnly => "MANUAL_ONLY",
            ExitMode::Disabled => "DISABLED",
        }
    }
}

impl FromStr for ExitMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENABLED" => Ok(ExitMode::Enabled),
            "MANUAL_ONLY" => Ok(ExitMode::ManualOnly),
            "DISABLED" => Ok(ExitMode::Disabled),
            other => Err(ParseEnumError::new("ExitMode", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

impl FromStr for PositionSide {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            other => Err(ParseEnumError::new("PositionSide", other)),
        }
    }
}

/// A held quantity of one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub position_id: String,
    pub account_id: String,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub qty: i64,
    /// Quantity at entry; TP tier sizes are computed from it.
    pub original_qty: i64,
    pub avg_price: Decimal,
    pub entry_ts: TimeMs,
    pub status: PositionStatus,
    pub exit_mode: ExitMode,
    pub exit_profile_id: Option<String>,
    /// Incremented on every accepted status or quantity mutation.
    pub version: i64,
    pub updated_ts: TimeMs,
}

impl Position {
    /// A freshly opened long position at version 1.
    pub fn open_long(
        account_id: impl Into<String>,
        symbol: Symbol,
        qty: i64,
        avg_price: Decimal,
        entry_ts: TimeMs,
    ) -> Self {
        Position {
            position_id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            symbol,
            side: PositionSide::Long,
            qty,
            original_qty: qty,
            avg_price,
            entry_ts,
            status: PositionStatus::Open,
            exit_mode: ExitMode::Enabled,
            exit_profile_id: None,
            version: 1,
            updated_ts: entry_ts,
        }
    }

    /// True if the automatic evaluation loop should look at this position.
    pub fn is_auto_evaluable(&self) -> bool {
        matches!(self.status, PositionStatus::Open | PositionStatus::Closing)
            && self.exit_mode == ExitMode::Enabled
    }
}
