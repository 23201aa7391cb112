//! Fill and fill cursor operations for the repository.

use crate::domain::{Decimal, Fill, FillCursor, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{cost_col, decimal_col, Repository};

const FILL_COLUMNS: &str = "fill_id, order_id, broker_exec_id, ts, qty, price, fee, tax, seq";

fn fill_from_row(row: &SqliteRow) -> Result<Fill, sqlx::Error> {
    let fill_id: String = row.try_get("fill_id")?;
    Ok(Fill {
        order_id: row.try_get("order_id")?,
        broker_exec_id: row.try_get("broker_exec_id")?,
        ts: TimeMs::new(row.try_get("ts")?),
        qty: row.try_get("qty")?,
        price: decimal_col(row, "price")?,
        fee: cost_col(row, "fee", &fill_id),
        tax: cost_col(row, "tax", &fill_id),
        seq: row.try_get("seq")?,
        fill_id,
    })
}

impl Repository {
    /// Record a fill and fold it into its order's quantities, atomically.
    ///
    /// The order row must already exist. On a new fill the order's
    /// `filled_qty` becomes the larger of its current value and the sum of
    /// its stored fills; `qty` grows to cover it and `open_qty` is
    /// recomputed. A re-delivered fill changes nothing.
    ///
    /// Returns true when the fill was new.
    ///
    /// # Errors
    /// Returns an error if any statement fails; the transaction is rolled back.
    pub async fn record_fill(&self, fill: &Fill) -> Result<bool, sqlx::Error> {
        let now = TimeMs::now();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO fills
            (fill_id, order_id, broker_exec_id, ts, qty, price, fee, tax, seq, created_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(order_id, broker_exec_id, seq) DO NOTHING
            "#,
        )
        .bind(&fill.fill_id)
        .bind(&fill.order_id)
        .bind(&fill.broker_exec_id)
        .bind(fill.ts.as_i64())
        .bind(fill.qty)
        .bind(fill.price.to_canonical_string())
        .bind(fill.fee.to_canonical_string())
        .bind(fill.tax.to_canonical_string())
        .bind(fill.seq)
        .bind(now.as_i64())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            tx.rollback().await?;
            return Ok(false);
        }

        let total: i64 = sqlx::query("SELECT COALESCE(SUM(qty), 0) AS total FROM fills WHERE order_id = ?")
            .bind(&fill.order_id)
            .fetch_one(&mut *tx)
            .await?
            .try_get("total")?;

        // SET expressions all see the pre-update row
        sqlx::query(
            r#"
            UPDATE orders
            SET filled_qty = MAX(filled_qty, ?1),
                qty = MAX(qty, filled_qty, ?1),
                open_qty = MAX(MAX(qty, filled_qty, ?1) - MAX(filled_qty, ?1), 0),
                updated_ts = ?2
            WHERE order_id = ?3
            "#,
        )
        .bind(total)
        .bind(now.as_i64())
        .bind(&fill.order_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn fills_for_order(&self, order_id: &str) -> Result<Vec<Fill>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM fills WHERE order_id = ? ORDER BY ts ASC, seq ASC",
            FILL_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(fill_from_row).collect()
    }

    /// Fills of every exit order placed for a position, in execution order.
    pub async fn exit_fills_for_position(&self, position_id: &str) -> Result<Vec<Fill>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT f.fill_id, f.order_id, f.broker_exec_id, f.ts, f.qty, f.price, f.fee, f.tax, f.seq
            FROM fills f
            JOIN orders o ON o.order_id = f.order_id
            JOIN order_intents i ON i.intent_id = o.intent_id
            WHERE i.position_id = ? AND i.intent_type IN ('EXIT_PARTIAL', 'EXIT_FULL')
            ORDER BY f.ts ASC, f.seq ASC
            "#,
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(fill_from_row).collect()
    }

    /// Volume-weighted price over an order's fills, if it has any.
    pub async fn order_fill_vwap(&self, order_id: &str) -> Result<Option<Decimal>, sqlx::Error> {
        let fills = self.fills_for_order(order_id).await?;
        Ok(vwap(&fills))
    }

    /// Volume-weighted exit price of a position across all its exit orders.
    pub async fn position_exit_vwap(&self, position_id: &str) -> Result<Option<Decimal>, sqlx::Error> {
        let fills = self.exit_fills_for_position(position_id).await?;
        Ok(vwap(&fills))
    }

    pub async fn get_fill_cursor(&self) -> Result<Option<FillCursor>, sqlx::Error> {
        let row = sqlx::query("SELECT last_ts, last_seq FROM fill_cursor WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(FillCursor::new(
                TimeMs::new(r.try_get("last_ts")?),
                r.try_get("last_seq")?,
            ))
        })
        .transpose()
    }

    /// Move the cursor forward. Never moves it backwards.
    pub async fn advance_fill_cursor(&self, cursor: FillCursor, now: TimeMs) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO fill_cursor (id, last_ts, last_seq, updated_ts)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                last_ts = excluded.last_ts,
                last_seq = excluded.last_seq,
                updated_ts = excluded.updated_ts
            WHERE excluded.last_ts > fill_cursor.last_ts
               OR (excluded.last_ts = fill_cursor.last_ts AND excluded.last_seq > fill_cursor.last_seq)
            "#,
        )
        .bind(cursor.last_ts.as_i64())
        .bind(cursor.last_seq)
        .bind(now.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Volume-weighted average price; `None` when total quantity is zero.
pub(crate) fn vwap(fills: &[Fill]) -> Option<Decimal> {
    let total_qty: i64 = fills.iter().map(|f| f.qty).sum();
    if total_qty <= 0 {
        return None;
    }
    let notional = fills
        .iter()
        .fold(Decimal::zero(), |acc, f| acc + f.price * Decimal::from_i64(f.qty));
    notional.checked_div(Decimal::from_i64(total_qty))
}
