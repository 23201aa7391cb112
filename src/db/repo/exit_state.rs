//! Exit FSM state operations for the repository.

use crate::domain::{Decimal, ExitState, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{enum_col, opt_decimal_col, Repository};

fn exit_state_from_row(row: &SqliteRow) -> Result<ExitState, sqlx::Error> {
    Ok(ExitState {
        position_id: row.try_get("position_id")?,
        phase: enum_col(row, "phase")?,
        hwm_price: opt_decimal_col(row, "hwm_price")?,
        stop_floor_price: opt_decimal_col(row, "stop_floor_price")?,
        cached_atr: opt_decimal_col(row, "cached_atr")?,
        stop_floor_breach_ticks: row.try_get("stop_floor_breach_ticks")?,
        trailing_breach_ticks: row.try_get("trailing_breach_ticks")?,
        last_avg_price: opt_decimal_col(row, "last_avg_price")?,
        updated_ts: TimeMs::new(row.try_get("updated_ts")?),
    })
}

impl Repository {
    pub async fn get_exit_state(&self, position_id: &str) -> Result<Option<ExitState>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT position_id, phase, hwm_price, stop_floor_price, cached_atr,
                   stop_floor_breach_ticks, trailing_breach_ticks, last_avg_price, updated_ts
            FROM exit_states
            WHERE position_id = ?
            "#,
        )
        .bind(position_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(exit_state_from_row).transpose()
    }

    /// Load the state, creating an OPEN row seeded with `avg_price` if absent.
    ///
    /// # Errors
    /// Returns an error if the position does not exist (foreign key) or the query fails.
    pub async fn get_or_create_exit_state(
        &self,
        position_id: &str,
        avg_price: Decimal,
        now: TimeMs,
    ) -> Result<ExitState, sqlx::Error> {
        let fresh = ExitState::new(position_id, avg_price, now);
        sqlx::query(
            r#"
            INSERT INTO exit_states (position_id, phase, last_avg_price, updated_ts)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(position_id) DO NOTHING
            "#,
        )
        .bind(position_id)
        .bind(fresh.phase.as_str())
        .bind(avg_price.to_canonical_string())
        .bind(now.as_i64())
        .execute(&self.pool)
        .await?;

        self.get_exit_state(position_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Write every mutable column of the state.
    pub async fn save_exit_state(&self, state: &ExitState) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO exit_states
            (position_id, phase, hwm_price, stop_floor_price, cached_atr,
             stop_floor_breach_ticks, trailing_breach_ticks, last_avg_price, updated_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(position_id) DO UPDATE SET
                phase = excluded.phase,
                hwm_price = excluded.hwm_price,
                stop_floor_price = excluded.stop_floor_price,
                cached_atr = excluded.cached_atr,
                stop_floor_breach_ticks = excluded.stop_floor_breach_ticks,
                trailing_breach_ticks = excluded.trailing_breach_ticks,
                last_avg_price = excluded.last_avg_price,
                updated_ts = excluded.updated_ts
            "#,
        )
        .bind(&state.position_id)
        .bind(state.phase.as_str())
        .bind(state.hwm_price.map(|p| p.to_canonical_string()))
        .bind(state.stop_floor_price.map(|p| p.to_canonical_string()))
        .bind(state.cached_atr.map(|p| p.to_canonical_string()))
        .bind(state.stop_floor_breach_ticks)
        .bind(state.trailing_breach_ticks)
        .bind(state.last_avg_price.map(|p| p.to_canonical_string()))
        .bind(state.updated_ts.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store the latest ATR without touching anything else.
    pub async fn set_cached_atr(
        &self,
        position_id: &str,
        atr: Option<Decimal>,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE exit_states SET cached_atr = ?, updated_ts = ?
            WHERE position_id = ?
            "#,
        )
        .bind(atr.map(|a| a.to_canonical_string()))
        .bind(now.as_i64())
        .bind(position_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
