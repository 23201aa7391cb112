//! Price feed backed by the `prices_best` table.

use super::{BestPrice, PriceFeed, PriceFeedError};
use crate::db::Repository;
use crate::domain::Symbol;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct StoredPriceFeed {
    repo: Arc<Repository>,
}

impl StoredPriceFeed {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl PriceFeed for StoredPriceFeed {
    async fn get_best_price(&self, symbol: &Symbol) -> Result<BestPrice, PriceFeedError> {
        let row = self
            .repo
            .get_best_price_row(symbol)
            .await
            .map_err(|e| PriceFeedError::Storage(e.to_string()))?
            .ok_or_else(|| PriceFeedError::NotFound(symbol.to_string()))?;

        Ok(BestPrice {
            best_price: row.best_price,
            bid_price: row.bid_price,
            is_stale: row.is_stale,
            as_of: row.as_of,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_test_db;
    use crate::db::repo::BestPriceRow;
    use crate::domain::{Decimal, TimeMs};

    #[tokio::test]
    async fn test_reads_stored_quote() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let feed = StoredPriceFeed::new(repo.clone());
        let symbol = Symbol::new("005930");

        assert!(matches!(
            feed.get_best_price(&symbol).await,
            Err(PriceFeedError::NotFound(_))
        ));

        repo.upsert_best_price(&BestPriceRow {
            symbol: symbol.clone(),
            best_price: Decimal::from_i64(70_100),
            bid_price: Some(Decimal::from_i64(70_000)),
            is_stale: true,
            as_of: TimeMs::new(5),
        })
        .await
        .unwrap();

        let quote = feed.get_best_price(&symbol).await.unwrap();
        assert!(quote.is_stale);
        assert_eq!(quote.exit_price(), Decimal::from_i64(70_000));
    }
}
