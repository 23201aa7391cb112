//! Broker order operations for the repository.

use crate::domain::{Order, OrderStatus, Symbol, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{enum_col, json_col, opt_enum_col, Repository};

const ORDER_COLUMNS: &str = r#"
    order_id, intent_id, account_id, symbol, side, qty, open_qty, filled_qty,
    status, broker_status, submitted_ts, updated_ts, raw
"#;

fn order_from_row(row: &SqliteRow) -> Result<Order, sqlx::Error> {
    Ok(Order {
        order_id: row.try_get("order_id")?,
        intent_id: row.try_get("intent_id")?,
        account_id: row.try_get("account_id")?,
        symbol: row.try_get::<Option<String>, _>("symbol")?.map(Symbol::new),
        side: opt_enum_col(row, "side")?,
        qty: row.try_get("qty")?,
        open_qty: row.try_get("open_qty")?,
        filled_qty: row.try_get("filled_qty")?,
        status: enum_col(row, "status")?,
        broker_status: row.try_get("broker_status")?,
        submitted_ts: TimeMs::new(row.try_get("submitted_ts")?),
        updated_ts: TimeMs::new(row.try_get("updated_ts")?),
        raw: json_col(row, "raw"),
    })
}

impl Repository {
    /// Insert an order or refresh its mutable fields.
    ///
    /// Identity fields (intent link, symbol, side, submission time) are only
    /// filled in when previously unknown, so a placeholder created from fills
    /// can be completed later without clobbering a real submission.
    ///
    /// # Errors
    /// Returns an error if the statement fails (including `filled_qty > qty`).
    pub async fn upsert_order(&self, order: &Order) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO orders
            (order_id, intent_id, account_id, symbol, side, qty, open_qty, filled_qty,
             status, broker_status, submitted_ts, updated_ts, raw)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(order_id) DO UPDATE SET
                intent_id = COALESCE(orders.intent_id, excluded.intent_id),
                symbol = COALESCE(orders.symbol, excluded.symbol),
                side = COALESCE(orders.side, excluded.side),
                qty = excluded.qty,
                open_qty = excluded.open_qty,
                filled_qty = excluded.filled_qty,
                status = excluded.status,
                broker_status = COALESCE(excluded.broker_status, orders.broker_status),
                updated_ts = excluded.updated_ts,
                raw = COALESCE(excluded.raw, orders.raw)
            "#,
        )
        .bind(&order.order_id)
        .bind(order.intent_id.as_deref())
        .bind(&order.account_id)
        .bind(order.symbol.as_ref().map(|s| s.as_str()))
        .bind(order.side.map(|s| s.as_str()))
        .bind(order.qty)
        .bind(order.open_qty)
        .bind(order.filled_qty)
        .bind(order.status.as_str())
        .bind(order.broker_status.as_deref())
        .bind(order.submitted_ts.as_i64())
        .bind(order.updated_ts.as_i64())
        .bind(order.raw.as_ref().map(|v| v.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>, sqlx::Error> {
        let sql = format!("SELECT {} FROM orders WHERE order_id = ?", ORDER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    pub async fn get_order_by_intent(&self, intent_id: &str) -> Result<Option<Order>, sqlx::Error> {
        let sql = format!("SELECT {} FROM orders WHERE intent_id = ?", ORDER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    /// Orders whose status is one of `statuses`, oldest submission first.
    pub async fn load_orders_by_status(
        &self,
        statuses: &[OrderStatus],
    ) -> Result<Vec<Order>, sqlx::Error> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM orders WHERE status IN ({}) ORDER BY submitted_ts ASC, order_id ASC",
            ORDER_COLUMNS, placeholders
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(order_from_row).collect()
    }

    /// Overwrite derived status and open quantity of an order.
    pub async fn update_order_progress(
        &self,
        order_id: &str,
        open_qty: i64,
        status: OrderStatus,
        broker_status: Option<&str>,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET open_qty = ?, status = ?, broker_status = COALESCE(?, broker_status), updated_ts = ?
            WHERE order_id = ?
            "#,
        )
        .bind(open_qty.max(0))
        .bind(status.as_str())
        .bind(broker_status)
        .bind(now.as_i64())
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use super::*;
    use crate::domain::Side;

    #[tokio::test]
    async fn test_upsert_keeps_identity_fields() {
        let (repo, _temp) = setup_test_db().await;
        let mut order = Order::placeholder("ord-1", "acct-1", TimeMs::new(10));
        order.symbol = Some(Symbol::new("005930"));
        order.side = Some(Side::Sell);
        order.qty = 10;
        order.open_qty = 10;
        repo.upsert_order(&order).await.unwrap();

        let mut refresh = Order::placeholder("ord-1", "acct-1", TimeMs::new(20));
        refresh.qty = 10;
        refresh.open_qty = 4;
        refresh.filled_qty = 6;
        refresh.status = OrderStatus::Partial;
        repo.upsert_order(&refresh).await.unwrap();

        let loaded = repo.get_order("ord-1").await.unwrap().unwrap();
        assert_eq!(loaded.symbol, Some(Symbol::new("005930")));
        assert_eq!(loaded.side, Some(Side::Sell));
        assert_eq!(loaded.submitted_ts, TimeMs::new(10));
        assert_eq!(loaded.filled_qty, 6);
        assert_eq!(loaded.status, OrderStatus::Partial);
    }

    #[tokio::test]
    async fn test_filled_cannot_exceed_qty() {
        let (repo, _temp) = setup_test_db().await;
        let mut order = Order::placeholder("ord-1", "acct-1", TimeMs::new(10));
        order.qty = 5;
        order.filled_qty = 6;
        assert!(repo.upsert_order(&order).await.is_err());
    }

    #[tokio::test]
    async fn test_load_by_status_and_progress_update() {
        let (repo, _temp) = setup_test_db().await;
        for (id, status) in [
            ("a", OrderStatus::Submitted),
            ("b", OrderStatus::Partial),
            ("c", OrderStatus::Filled),
        ] {
            let mut o = Order::placeholder(id, "acct-1", TimeMs::new(1));
            o.qty = 10;
            o.status = status;
            repo.upsert_order(&o).await.unwrap();
        }

        let live = repo
            .load_orders_by_status(&[OrderStatus::Submitted, OrderStatus::Partial])
            .await
            .unwrap();
        assert_eq!(live.len(), 2);

        assert!(repo
            .update_order_progress("b", -3, OrderStatus::CancelledPartial, Some("CANCELLED"), TimeMs::new(5))
            .await
            .unwrap());
        let b = repo.get_order("b").await.unwrap().unwrap();
        assert_eq!(b.open_qty, 0);
        assert_eq!(b.status, OrderStatus::CancelledPartial);
        assert_eq!(b.broker_status.as_deref(), Some("CANCELLED"));
    }
}
