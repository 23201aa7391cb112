//! Best-price feed consumed by the exit engine.

use crate::domain::{Decimal, Symbol, TimeMs};
use async_trait::async_trait;
use std::fmt;

pub mod mock;
pub mod stored;

pub use mock::MockPriceFeed;
pub use stored::StoredPriceFeed;

/// Quote for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestPrice {
    pub best_price: Decimal,
    pub bid_price: Option<Decimal>,
    pub is_stale: bool,
    pub as_of: TimeMs,
}

impl BestPrice {
    /// Price an exit would realise: the bid when quoted, else the best price.
    pub fn exit_price(&self) -> Decimal {
        match self.bid_price {
            Some(bid) if bid.is_positive() => bid,
            _ => self.best_price,
        }
    }

    /// Usable for a decision at `now`: not flagged stale and no older than `max_age_ms`.
    pub fn is_fresh(&self, now: TimeMs, max_age_ms: i64) -> bool {
        !self.is_stale && now.since(self.as_of) <= max_age_ms
    }
}

#[async_trait]
pub trait PriceFeed: Send + Sync + fmt::Debug {
    async fn get_best_price(&self, symbol: &Symbol) -> Result<BestPrice, PriceFeedError>;
}

#[derive(Debug, Clone)]
pub enum PriceFeedError {
    /// No quote for the symbol at all.
    NotFound(String),
    Storage(String),
}

impl fmt::Display for PriceFeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceFeedError::NotFound(symbol) => write!(f, "No price for {}", symbol),
            PriceFeedError::Storage(msg) => write!(f, "Price storage error: {}", msg),
        }
    }
}

impl std::error::Error for PriceFeedError {}
