//! Opens the exit database and brings its schema up to date.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Bumped whenever `schema.sql` changes. Stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Open (creating if needed) the SQLite database at `db_path` and apply the schema.
///
/// Every pooled connection enforces foreign keys, so fills cannot reference
/// a missing order and intents cannot outlive their position.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!(path = %db_path, schema_version = SCHEMA_VERSION, "Exit database ready");
    Ok(pool)
}

/// Apply `schema.sql` when the stored version is behind. The statements are
/// idempotent, so a partially applied run is safe to repeat.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let current: i64 = sqlx::query("PRAGMA user_version")
        .fetch_one(pool)
        .await?
        .try_get(0)?;
    if current >= SCHEMA_VERSION {
        debug!(current, "Schema up to date");
        return Ok(());
    }

    debug!(from = current, to = SCHEMA_VERSION, "Applying schema");
    let mut tx = pool.begin().await?;
    for statement in include_str!("schema.sql").split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(&mut *tx).await?;
        }
    }
    // PRAGMA does not take bind parameters
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}
