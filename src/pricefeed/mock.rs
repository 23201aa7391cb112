//! In-memory price feed for tests.

use super::{BestPrice, PriceFeed, PriceFeedError};
use crate::domain::{Decimal, Symbol, TimeMs};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct MockPriceFeed {
    prices: Mutex<HashMap<Symbol, BestPrice>>,
}

impl MockPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh quote with no bid, stamped now.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.set_quote(
            symbol,
            BestPrice {
                best_price: price,
                bid_price: None,
                is_stale: false,
                as_of: TimeMs::now(),
            },
        );
    }

    pub fn set_quote(&self, symbol: &str, quote: BestPrice) {
        self.prices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Symbol::new(symbol), quote);
    }
}

#[async_trait]
impl PriceFeed for MockPriceFeed {
    async fn get_best_price(&self, symbol: &Symbol) -> Result<BestPrice, PriceFeedError> {
        self.prices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied()
            .ok_or_else(|| PriceFeedError::NotFound(symbol.to_string()))
    }
}
