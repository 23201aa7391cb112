//! Position operations for the repository.

use crate::domain::{Decimal, ExitMode, Position, PositionStatus, Symbol, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decimal_col, enum_col, Repository};

const POSITION_COLUMNS: &str = r#"
    position_id, account_id, symbol, side, qty, original_qty, avg_price, entry_ts,
    status, exit_mode, exit_profile_id, version, updated_ts
"#;

fn position_from_row(row: &SqliteRow) -> Result<Position, sqlx::Error> {
    Ok(Position {
        position_id: row.try_get("position_id")?,
        account_id: row.try_get("account_id")?,
        symbol: Symbol::new(row.try_get::<String, _>("symbol")?),
        side: enum_col(row, "side")?,
        qty: row.try_get("qty")?,
        original_qty: row.try_get("original_qty")?,
        avg_price: decimal_col(row, "avg_price")?,
        entry_ts: TimeMs::new(row.try_get("entry_ts")?),
        status: enum_col(row, "status")?,
        exit_mode: enum_col(row, "exit_mode")?,
        exit_profile_id: row.try_get("exit_profile_id")?,
        version: row.try_get("version")?,
        updated_ts: TimeMs::new(row.try_get("updated_ts")?),
    })
}

impl Repository {
    /// Insert a new position.
    ///
    /// # Errors
    /// Returns an error if the insert fails (including a duplicate id).
    pub async fn insert_position(&self, position: &Position) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO positions
            (position_id, account_id, symbol, side, qty, original_qty, avg_price, entry_ts,
             status, exit_mode, exit_profile_id, version, updated_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.position_id)
        .bind(&position.account_id)
        .bind(position.symbol.as_str())
        .bind(position.side.as_str())
        .bind(position.qty)
        .bind(position.original_qty)
        .bind(position.avg_price.to_canonical_string())
        .bind(position.entry_ts.as_i64())
        .bind(position.status.as_str())
        .bind(position.exit_mode.as_str())
        .bind(position.exit_profile_id.as_deref())
        .bind(position.version)
        .bind(position.updated_ts.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails or a column cannot be decoded.
    pub async fn get_position(&self, position_id: &str) -> Result<Option<Position>, sqlx::Error> {
        let sql = format!("SELECT {} FROM positions WHERE position_id = ?", POSITION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(position_from_row).transpose()
    }

    /// Positions the automatic evaluation loop looks at: OPEN or CLOSING,
    /// exit mode ENABLED.
    ///
    /// Rows that fail to decode are skipped with a warning so that one bad
    /// row does not stall the loop.
    pub async fn load_evaluable_positions(&self) -> Result<Vec<Position>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {} FROM positions
            WHERE status IN ('OPEN', 'CLOSING') AND exit_mode = 'ENABLED'
            ORDER BY entry_ts ASC, position_id ASC
            "#,
            POSITION_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .filter_map(|row| match position_from_row(row) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::error!(error = %e, "Skipping undecodable position row");
                    None
                }
            })
            .collect())
    }

    /// Latest OPEN or CLOSING position for a symbol.
    pub async fn find_active_position_by_symbol(
        &self,
        account_id: &str,
        symbol: &Symbol,
    ) -> Result<Option<Position>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {} FROM positions
            WHERE account_id = ? AND symbol = ? AND status IN ('OPEN', 'CLOSING')
            ORDER BY entry_ts DESC, position_id DESC
            LIMIT 1
            "#,
            POSITION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(symbol.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(position_from_row).transpose()
    }

    /// Compare-and-set the position status on `expected_version`.
    ///
    /// Returns false when the version or status no longer matches.
    pub async fn transition_position_status(
        &self,
        position_id: &str,
        expected_version: i64,
        from: PositionStatus,
        to: PositionStatus,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = ?, version = version + 1, updated_ts = ?
            WHERE position_id = ? AND version = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(now.as_i64())
        .bind(position_id)
        .bind(expected_version)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Apply broker-reported quantity and average price. Bumps the version
    /// only when something actually changed.
    pub async fn sync_position_quantity(
        &self,
        position_id: &str,
        qty: i64,
        avg_price: Decimal,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET qty = ?, avg_price = ?, version = version + 1, updated_ts = ?
            WHERE position_id = ? AND status IN ('OPEN', 'CLOSING')
              AND (qty != ? OR avg_price != ?)
            "#,
        )
        .bind(qty)
        .bind(avg_price.to_canonical_string())
        .bind(now.as_i64())
        .bind(position_id)
        .bind(qty)
        .bind(avg_price.to_canonical_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a position CLOSED with zero quantity.
    pub async fn close_position(&self, position_id: &str, now: TimeMs) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = 'CLOSED', qty = 0, version = version + 1, updated_ts = ?
            WHERE position_id = ? AND status != 'CLOSED'
            "#,
        )
        .bind(now.as_i64())
        .bind(position_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_position_exit_mode(
        &self,
        position_id: &str,
        exit_mode: ExitMode,
        exit_profile_id: Option<&str>,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET exit_mode = ?, exit_profile_id = ?, updated_ts = ?
            WHERE position_id = ?
            "#,
        )
        .bind(exit_mode.as_str())
        .bind(exit_profile_id)
        .bind(now.as_i64())
        .bind(position_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Quantity not yet committed to an exit, floored at zero.
    ///
    /// Subtracts the open quantity of live orders (SUBMITTED, PARTIAL) and the
    /// quantity of active intents that have no order row yet.
    ///
    /// # Errors
    /// Returns `RowNotFound` if the position does not exist.
    pub async fn available_qty(&self, position_id: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                p.qty
                - COALESCE((
                    SELECT SUM(o.open_qty)
                    FROM orders o
                    JOIN order_intents i ON o.intent_id = i.intent_id
                    WHERE i.position_id = p.position_id
                      AND o.status IN ('SUBMITTED', 'PARTIAL')
                ), 0)
                - COALESCE((
                    SELECT SUM(i.qty)
                    FROM order_intents i
                    WHERE i.position_id = p.position_id
                      AND i.status IN ('NEW', 'PENDING_APPROVAL', 'SUBMITTED')
                      AND NOT EXISTS (SELECT 1 FROM orders o WHERE o.intent_id = i.intent_id)
                ), 0) AS available
            FROM positions p
            WHERE p.position_id = ?
            "#,
        )
        .bind(position_id)
        .fetch_one(&self.pool)
        .await?;

        let available: i64 = row.try_get("available")?;
        Ok(available.max(0))
    }
}
