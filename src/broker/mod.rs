//! Broker adapter abstraction: order submission and the broker's view of
//! orders, fills and holdings.

use crate::domain::{Decimal, Fill, OrderType, Side, Symbol, TimeMs};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod http;
pub mod mock;

pub use http::HttpBroker;
pub use mock::MockBroker;

/// Narrow capability interface to the brokerage.
///
/// Implementations own transport concerns (auth, retry, rate limiting).
/// `submit_order` must never be retried once the request may have reached
/// the broker.
#[async_trait]
pub trait BrokerAdapter: Send + Sync + fmt::Debug {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError>;

    async fn get_unfilled_orders(&self, account_id: &str) -> Result<Vec<UnfilledOrder>, BrokerError>;

    /// Fills at or after `since`. The boundary is inclusive.
    async fn get_fills(&self, account_id: &str, since: TimeMs) -> Result<Vec<BrokerFill>, BrokerError>;

    async fn get_fills_for_order(&self, order_id: &str) -> Result<Vec<BrokerFill>, BrokerError>;

    async fn get_holdings(&self, account_id: &str) -> Result<Vec<BrokerHolding>, BrokerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub account_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: i64,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    /// Intent id, echoed by brokers that support client references.
    pub client_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: String,
    pub ts: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnfilledOrder {
    pub order_id: String,
    pub symbol: Option<Symbol>,
    pub side: Option<Side>,
    pub qty: i64,
    pub open_qty: i64,
    pub filled_qty: i64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerFill {
    pub order_id: String,
    pub exec_id: String,
    pub ts: TimeMs,
    pub qty: i64,
    pub price: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    pub seq: i64,
}

impl BrokerFill {
    pub fn to_fill(&self) -> Fill {
        Fill::new(
            self.order_id.clone(),
            self.exec_id.clone(),
            self.ts,
            self.qty,
            self.price,
            self.fee,
            self.tax,
            self.seq,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerHolding {
    pub symbol: Symbol,
    pub qty: i64,
    pub avg_price: Decimal,
    pub current_price: Decimal,
}

/// Error type for broker operations.
#[derive(Debug, Clone)]
pub enum BrokerError {
    /// Connection failure, timeout, DNS.
    NetworkError(String),
    HttpError { status: u16, message: String },
    ParseError(String),
    RateLimited,
    /// The broker refused the order.
    Rejected(String),
    Other(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            BrokerError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            BrokerError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            BrokerError::RateLimited => write!(f, "Rate limited"),
            BrokerError::Rejected(msg) => write!(f, "Order rejected: {}", msg),
            BrokerError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}
