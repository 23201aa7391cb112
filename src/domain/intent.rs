//! Order intents: the only channel from the exit engine to execution.

use crate::domain::{Decimal, ExitPhase, ParseEnumError, Side, Symbol, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentType {
    Entry,
    ExitPartial,
    ExitFull,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Entry => "ENTRY",
            IntentType::ExitPartial => "EXIT_PARTIAL",
            IntentType::ExitFull => "EXIT_FULL",
        }
    }

    pub fn is_exit(&self) -> bool {
        !matches!(self, IntentType::Entry)
    }

    /// Broker side for a long-only book.
    pub fn side(&self) -> Side {
        match self {
            IntentType::Entry => Side::Buy,
            IntentType::ExitPartial | IntentType::ExitFull => Side::Sell,
        }
    }
}

impl FromStr for IntentType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTRY" => Ok(IntentType::Entry),
            "EXIT_PARTIAL" => Ok(IntentType::ExitPartial),
            "EXIT_FULL" => Ok(IntentType::ExitFull),
            other => Err(ParseEnumError::new("IntentType", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Mkt,
    Lmt,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Mkt => "MKT",
            OrderType::Lmt => "LMT",
        }
    }
}

impl FromStr for OrderType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MKT" => Ok(OrderType::Mkt),
            "LMT" => Ok(OrderType::Lmt),
            other => Err(ParseEnumError::new("OrderType", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    New,
    PendingApproval,
    Submitted,
    Filled,
    Duplicate,
    Failed,
    Cancelled,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::New => "NEW",
            IntentStatus::PendingApproval => "PENDING_APPROVAL",
            IntentStatus::Submitted => "SUBMITTED",
            IntentStatus::Filled => "FILLED",
            IntentStatus::Duplicate => "DUPLICATE",
            IntentStatus::Failed => "FAILED",
            IntentStatus::Cancelled => "CANCELLED",
        }
    }

    /// Counts against severity suppression.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            IntentStatus::New | IntentStatus::PendingApproval | IntentStatus::Submitted
        )
    }

    /// Not yet handed to the broker, so still cancellable locally.
    pub fn is_unsubmitted(&self) -> bool {
        matches!(self, IntentStatus::New | IntentStatus::PendingApproval)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(IntentStatus::New),
            "PENDING_APPROVAL" => Ok(IntentStatus::PendingApproval),
            "SUBMITTED" => Ok(IntentStatus::Submitted),
            "FILLED" => Ok(IntentStatus::Filled),
            "DUPLICATE" => Ok(IntentStatus::Duplicate),
            "FAILED" => Ok(IntentStatus::Failed),
            "CANCELLED" => Ok(IntentStatus::Cancelled),
            other => Err(ParseEnumError::new("IntentStatus", other)),
        }
    }
}

/// Why an intent exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Sl1,
    Sl2,
    StopFloor,
    Tp1,
    Tp2,
    Tp3,
    TrailPartial,
    Trail,
    Time,
    Flatten,
    Manual,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Sl1 => "SL1",
            ReasonCode::Sl2 => "SL2",
            ReasonCode::StopFloor => "STOP_FLOOR",
            ReasonCode::Tp1 => "TP1",
            ReasonCode::Tp2 => "TP2",
            ReasonCode::Tp3 => "TP3",
            ReasonCode::TrailPartial => "TRAIL_PARTIAL",
            ReasonCode::Trail => "TRAIL",
            ReasonCode::Time => "TIME",
            ReasonCode::Flatten => "FLATTEN",
            ReasonCode::Manual => "MANUAL",
        }
    }

    /// Higher wins. A trigger is acted on only if it outranks every
    /// active intent of the same position.
    pub fn severity(&self) -> u32 {
        match self {
            ReasonCode::Flatten => 110,
            ReasonCode::Sl2 => 100,
            ReasonCode::Sl1 => 90,
            ReasonCode::StopFloor => 80,
            ReasonCode::Tp3 => 30,
            ReasonCode::Tp2 => 20,
            ReasonCode::Tp1 => 10,
            ReasonCode::TrailPartial | ReasonCode::Trail => 5,
            ReasonCode::Time => 1,
            ReasonCode::Manual => 0,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SL1" => Ok(ReasonCode::Sl1),
            "SL2" => Ok(ReasonCode::Sl2),
            "STOP_FLOOR" => Ok(ReasonCode::StopFloor),
            "TP1" => Ok(ReasonCode::Tp1),
            "TP2" => Ok(ReasonCode::Tp2),
            "TP3" => Ok(ReasonCode::Tp3),
            "TRAIL_PARTIAL" => Ok(ReasonCode::TrailPartial),
            "TRAIL" => Ok(ReasonCode::Trail),
            "TIME" => Ok(ReasonCode::Time),
            "FLATTEN" => Ok(ReasonCode::Flatten),
            "MANUAL" => Ok(ReasonCode::Manual),
            other => Err(ParseEnumError::new("ReasonCode", other)),
        }
    }
}

/// Deterministic dedup key `positionID:phase:reasonCode`.
pub fn action_key(position_id: &str, phase: ExitPhase, reason: ReasonCode) -> String {
    format!("{}:{}:{}", position_id, phase.as_str(), reason.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderIntent {
    pub intent_id: String,
    pub position_id: String,
    pub account_id: String,
    pub symbol: Symbol,
    pub intent_type: IntentType,
    pub qty: i64,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub reason_code: ReasonCode,
    pub action_key: String,
    pub status: IntentStatus,
    pub error_message: Option<String>,
    pub created_ts: TimeMs,
    pub updated_ts: TimeMs,
}

impl OrderIntent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        position_id: impl Into<String>,
        account_id: impl Into<String>,
        symbol: Symbol,
        intent_type: IntentType,
        qty: i64,
        order_type: OrderType,
        limit_price: Option<Decimal>,
        reason_code: ReasonCode,
        action_key: String,
        status: IntentStatus,
        now: TimeMs,
    ) -> Self {
        OrderIntent {
            intent_id: uuid::Uuid::new_v4().to_string(),
            position_id: position_id.into(),
            account_id: account_id.into(),
            symbol,
            intent_type,
            qty,
            order_type,
            limit_price,
            reason_code,
            action_key,
            status,
            error_message: None,
            created_ts: now,
            updated_ts: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_key_format() {
        assert_eq!(
            action_key("pos-1", ExitPhase::Tp1Done, ReasonCode::StopFloor),
            "pos-1:TP1_DONE:STOP_FLOOR"
        );
    }

    #[test]
    fn test_severity_ranking() {
        let ordered = [
            ReasonCode::Sl2,
            ReasonCode::Sl1,
            ReasonCode::StopFloor,
            ReasonCode::Tp3,
            ReasonCode::Tp2,
            ReasonCode::Tp1,
            ReasonCode::Trail,
            ReasonCode::Time,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].severity() > pair[1].severity(), "{:?}", pair);
        }
        assert_eq!(ReasonCode::TrailPartial.severity(), ReasonCode::Trail.severity());
    }

    #[test]
    fn test_active_statuses() {
        assert!(IntentStatus::New.is_active());
        assert!(IntentStatus::Submitted.is_active());
        assert!(!IntentStatus::Submitted.is_unsubmitted());
        assert!(!IntentStatus::Filled.is_active());
        assert!(!IntentStatus::Failed.is_active());
    }

    #[test]
    fn test_reason_parse_roundtrip() {
        let r = ReasonCode::from_str("TRAIL_PARTIAL").unwrap();
        assert_eq!(r, ReasonCode::TrailPartial);
        assert_eq!(r.as_str(), "TRAIL_PARTIAL");
    }
}
