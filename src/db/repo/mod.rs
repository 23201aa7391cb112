//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `positions.rs` - Positions, optimistic locking, available quantity
//! - `exit_state.rs` - Exit FSM state rows
//! - `profiles.rs` - Exit profiles, symbol overrides, global control
//! - `intents.rs` - Order intents
//! - `orders.rs` - Broker orders
//! - `fills.rs` - Fills and the fill cursor
//! - `holdings.rs` - Broker holdings
//! - `exit_events.rs` - Exit events and exit signals
//! - `prices.rs` - Best-price rows written by the price-sync process

mod exit_events;
mod exit_state;
mod fills;
mod holdings;
mod intents;
mod orders;
mod positions;
mod prices;
mod profiles;

pub use prices::BestPriceRow;

use crate::domain::Decimal;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// =========================================================================
// Row decoding helpers
// =========================================================================

fn decode_err<E>(err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(err))
}

/// Decode a required decimal column. Prices drive decisions, so a corrupt
/// value is an error rather than a silent zero.
pub(crate) fn decimal_col(row: &SqliteRow, col: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(col)?;
    Decimal::from_str(&raw).map_err(decode_err)
}

pub(crate) fn opt_decimal_col(row: &SqliteRow, col: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| Decimal::from_str(&s).map_err(decode_err))
        .transpose()
}

/// Decode a cost column (fee, tax), falling back to zero on garbage.
pub(crate) fn cost_col(row: &SqliteRow, col: &str, key: &str) -> Decimal {
    let raw: String = row.try_get(col).unwrap_or_default();
    Decimal::from_str(&raw).unwrap_or_else(|e| {
        warn!(
            key = %key,
            column = col,
            value = %raw,
            error = %e,
            "Failed to parse cost decimal, using zero"
        );
        Decimal::zero()
    })
}

pub(crate) fn enum_col<T>(row: &SqliteRow, col: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(col)?;
    T::from_str(&raw).map_err(decode_err)
}

pub(crate) fn opt_enum_col<T>(row: &SqliteRow, col: &str) -> Result<Option<T>, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| T::from_str(&s).map_err(decode_err)).transpose()
}

pub(crate) fn json_col(row: &SqliteRow, col: &str) -> Option<serde_json::Value> {
    let raw: Option<String> = row.try_get(col).ok().flatten();
    raw.and_then(|s| serde_json::from_str(&s).ok())
}
