//! Exit event and exit signal operations for the repository.

use crate::domain::{ExitEvent, ExitSignal, Symbol, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decimal_col, enum_col, Repository};

fn exit_event_from_row(row: &SqliteRow) -> Result<ExitEvent, sqlx::Error> {
    Ok(ExitEvent {
        exit_event_id: row.try_get("exit_event_id")?,
        position_id: row.try_get("position_id")?,
        account_id: row.try_get("account_id")?,
        symbol: Symbol::new(row.try_get::<String, _>("symbol")?),
        exit_ts: TimeMs::new(row.try_get("exit_ts")?),
        exit_qty: row.try_get("exit_qty")?,
        exit_avg_price: decimal_col(row, "exit_avg_price")?,
        entry_avg_price: decimal_col(row, "entry_avg_price")?,
        reason_code: row.try_get("reason_code")?,
        source: enum_col(row, "source")?,
        intent_id: row.try_get("intent_id")?,
        exit_profile_id: row.try_get("exit_profile_id")?,
        realized_pnl: decimal_col(row, "realized_pnl")?,
        realized_pnl_pct: decimal_col(row, "realized_pnl_pct")?,
        created_ts: TimeMs::new(row.try_get("created_ts")?),
    })
}

impl Repository {
    /// Insert the exit event of a position. At most one per position.
    ///
    /// Returns false if the position already has one.
    pub async fn insert_exit_event(&self, event: &ExitEvent) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO exit_events
            (exit_event_id, position_id, account_id, symbol, exit_ts, exit_qty, exit_avg_price,
             entry_avg_price, reason_code, source, intent_id, exit_profile_id, realized_pnl,
             realized_pnl_pct, created_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(position_id) DO NOTHING
            "#,
        )
        .bind(&event.exit_event_id)
        .bind(&event.position_id)
        .bind(&event.account_id)
        .bind(event.symbol.as_str())
        .bind(event.exit_ts.as_i64())
        .bind(event.exit_qty)
        .bind(event.exit_avg_price.to_canonical_string())
        .bind(event.entry_avg_price.to_canonical_string())
        .bind(&event.reason_code)
        .bind(event.source.as_str())
        .bind(event.intent_id.as_deref())
        .bind(event.exit_profile_id.as_deref())
        .bind(event.realized_pnl.to_canonical_string())
        .bind(event.realized_pnl_pct.to_canonical_string())
        .bind(event.created_ts.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_exit_event_for_position(
        &self,
        position_id: &str,
    ) -> Result<Option<ExitEvent>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT exit_event_id, position_id, account_id, symbol, exit_ts, exit_qty,
                   exit_avg_price, entry_avg_price, reason_code, source, intent_id,
                   exit_profile_id, realized_pnl, realized_pnl_pct, created_ts
            FROM exit_events WHERE position_id = ?
            "#,
        )
        .bind(position_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(exit_event_from_row).transpose()
    }

    pub async fn insert_exit_signal(&self, signal: &ExitSignal) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO exit_signals
            (signal_id, position_id, reason_code, phase, trigger_price, pnl_pct, qty,
             intent_created, evaluated_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.signal_id)
        .bind(&signal.position_id)
        .bind(signal.reason_code.as_str())
        .bind(signal.phase.as_str())
        .bind(signal.trigger_price.to_canonical_string())
        .bind(signal.pnl_pct.to_canonical_string())
        .bind(signal.qty)
        .bind(signal.intent_created)
        .bind(signal.evaluated_ts.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_exit_signals(&self, position_id: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM exit_signals WHERE position_id = ?")
            .bind(position_id)
            .fetch_one(&self.pool)
            .await?;
        row.try_get("n")
    }
}
