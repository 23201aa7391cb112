//! Broker-submitted orders.

use crate::domain::{ParseEnumError, Side, Symbol, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Locally derived order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Submitted,
    Partial,
    Filled,
    Cancelled,
    CancelledPartial,
    Rejected,
    Error,
    Unknown,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::CancelledPartial => "CANCELLED_PARTIAL",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Error => "ERROR",
            OrderStatus::Unknown => "UNKNOWN",
        }
    }

    /// Still working at the broker; its open quantity locks position quantity.
    pub fn is_live(&self) -> bool {
        matches!(self, OrderStatus::Submitted | OrderStatus::Partial)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(OrderStatus::Submitted),
            "PARTIAL" => Ok(OrderStatus::Partial),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "CANCELLED_PARTIAL" => Ok(OrderStatus::CancelledPartial),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "ERROR" => Ok(OrderStatus::Error),
            "UNKNOWN" => Ok(OrderStatus::Unknown),
            other => Err(ParseEnumError::new("OrderStatus", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Broker-assigned.
    pub order_id: String,
    pub intent_id: Option<String>,
    pub account_id: String,
    pub symbol: Option<Symbol>,
    pub side: Option<Side>,
    pub qty: i64,
    pub open_qty: i64,
    pub filled_qty: i64,
    pub status: OrderStatus,
    pub broker_status: Option<String>,
    pub submitted_ts: TimeMs,
    pub updated_ts: TimeMs,
    pub raw: Option<serde_json::Value>,
}

impl Order {
    /// Stand-in for an order first seen through its fills.
    pub fn placeholder(order_id: impl Into<String>, account_id: impl Into<String>, now: TimeMs) -> Self {
        Order {
            order_id: order_id.into(),
            intent_id: None,
            account_id: account_id.into(),
            symbol: None,
            side: None,
            qty: 0,
            open_qty: 0,
            filled_qty: 0,
            status: OrderStatus::Submitted,
            broker_status: None,
            submitted_ts: now,
            updated_ts: now,
            raw: None,
        }
    }
}
