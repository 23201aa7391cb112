//! Best-price rows maintained by the external price-sync process.

use crate::domain::{Decimal, Symbol, TimeMs};
use sqlx::Row;

use super::{decimal_col, opt_decimal_col, Repository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestPriceRow {
    pub symbol: Symbol,
    pub best_price: Decimal,
    pub bid_price: Option<Decimal>,
    pub is_stale: bool,
    pub as_of: TimeMs,
}

impl Repository {
    pub async fn get_best_price_row(&self, symbol: &Symbol) -> Result<Option<BestPriceRow>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT symbol, best_price, bid_price, is_stale, as_of FROM prices_best WHERE symbol = ?",
        )
        .bind(symbol.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(BestPriceRow {
                symbol: Symbol::new(r.try_get::<String, _>("symbol")?),
                best_price: decimal_col(&r, "best_price")?,
                bid_price: opt_decimal_col(&r, "bid_price")?,
                is_stale: r.try_get("is_stale")?,
                as_of: TimeMs::new(r.try_get("as_of")?),
            })
        })
        .transpose()
    }

    /// Used by tests and local tooling; production rows come from the price-sync process.
    pub async fn upsert_best_price(&self, row: &BestPriceRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO prices_best (symbol, best_price, bid_price, is_stale, as_of)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                best_price = excluded.best_price,
                bid_price = excluded.bid_price,
                is_stale = excluded.is_stale,
                as_of = excluded.as_of
            "#,
        )
        .bind(row.symbol.as_str())
        .bind(row.best_price.to_canonical_string())
        .bind(row.bid_price.map(|p| p.to_canonical_string()))
        .bind(row.is_stale)
        .bind(row.as_of.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
