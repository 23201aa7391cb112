//! Broker-reported holdings.

use crate::domain::{Decimal, Symbol, TimeMs};
use serde::{Deserialize, Serialize};

/// Current quantity of one symbol as the broker sees it.
///
/// A zero quantity is kept rather than deleted so consecutive syncs can be diffed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub account_id: String,
    pub symbol: Symbol,
    pub qty: i64,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub updated_ts: TimeMs,
    pub raw: Option<serde_json::Value>,
}
