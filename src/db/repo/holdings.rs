//! Holdings snapshot operations for the repository.

use crate::domain::{Holding, Symbol, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decimal_col, json_col, Repository};

fn holding_from_row(row: &SqliteRow) -> Result<Holding, sqlx::Error> {
    Ok(Holding {
        account_id: row.try_get("account_id")?,
        symbol: Symbol::new(row.try_get::<String, _>("symbol")?),
        qty: row.try_get("qty")?,
        avg_price: decimal_col(row, "avg_price")?,
        current_price: decimal_col(row, "current_price")?,
        updated_ts: TimeMs::new(row.try_get("updated_ts")?),
        raw: json_col(row, "raw"),
    })
}

impl Repository {
    /// Upsert a batch of holdings in one transaction.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn upsert_holdings(&self, holdings: &[Holding]) -> Result<(), sqlx::Error> {
        if holdings.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for h in holdings {
            sqlx::query(
                r#"
                INSERT INTO holdings (account_id, symbol, qty, avg_price, current_price, updated_ts, raw)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(account_id, symbol) DO UPDATE SET
                    qty = excluded.qty,
                    avg_price = excluded.avg_price,
                    current_price = excluded.current_price,
                    updated_ts = excluded.updated_ts,
                    raw = excluded.raw
                "#,
            )
            .bind(&h.account_id)
            .bind(h.symbol.as_str())
            .bind(h.qty)
            .bind(h.avg_price.to_canonical_string())
            .bind(h.current_price.to_canonical_string())
            .bind(h.updated_ts.as_i64())
            .bind(h.raw.as_ref().map(|v| v.to_string()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }

    pub async fn list_holdings(&self, account_id: &str) -> Result<Vec<Holding>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, symbol, qty, avg_price, current_price, updated_ts, raw
            FROM holdings WHERE account_id = ? ORDER BY symbol ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(holding_from_row).collect()
    }

    /// Set qty to zero for every nonzero holding of the account not in `present`.
    ///
    /// Returns the symbols that were zeroed.
    pub async fn zero_missing_holdings(
        &self,
        account_id: &str,
        present: &[Symbol],
        now: TimeMs,
    ) -> Result<Vec<Symbol>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT symbol FROM holdings WHERE account_id = ? AND qty != 0")
            .bind(account_id)
            .fetch_all(&mut *tx)
            .await?;

        let mut zeroed = Vec::new();
        for row in rows {
            let symbol = Symbol::new(row.try_get::<String, _>("symbol")?);
            if present.contains(&symbol) {
                continue;
            }
            sqlx::query("UPDATE holdings SET qty = 0, updated_ts = ? WHERE account_id = ? AND symbol = ?")
                .bind(now.as_i64())
                .bind(account_id)
                .bind(symbol.as_str())
                .execute(&mut *tx)
                .await?;
            zeroed.push(symbol);
        }
        tx.commit().await?;
        Ok(zeroed)
    }
}
