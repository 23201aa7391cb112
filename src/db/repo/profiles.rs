//! Exit profile, symbol override and control operations for the repository.

use crate::domain::{ExitControl, ExitProfile, ExitProfileConfig, Symbol, SymbolExitOverride, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decode_err, enum_col, Repository};

fn profile_from_row(row: &SqliteRow) -> Result<ExitProfile, sqlx::Error> {
    let config_json: String = row.try_get("config")?;
    let config: ExitProfileConfig = serde_json::from_str(&config_json).map_err(decode_err)?;
    Ok(ExitProfile {
        profile_id: row.try_get("profile_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        config,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        created_by: row.try_get("created_by")?,
        created_ts: TimeMs::new(row.try_get("created_ts")?),
        updated_ts: TimeMs::new(row.try_get("updated_ts")?),
    })
}

fn override_from_row(row: &SqliteRow) -> Result<SymbolExitOverride, sqlx::Error> {
    Ok(SymbolExitOverride {
        symbol: Symbol::new(row.try_get::<String, _>("symbol")?),
        profile_id: row.try_get("profile_id")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        effective_from: row
            .try_get::<Option<i64>, _>("effective_from")?
            .map(TimeMs::new),
        reason: row.try_get("reason")?,
        created_by: row.try_get("created_by")?,
        updated_ts: TimeMs::new(row.try_get("updated_ts")?),
    })
}

impl Repository {
    // =========================================================================
    // Exit profiles
    // =========================================================================

    pub async fn get_profile(&self, profile_id: &str) -> Result<Option<ExitProfile>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT profile_id, name, description, config, is_active, created_by, created_ts, updated_ts
            FROM exit_profiles WHERE profile_id = ?
            "#,
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    pub async fn list_profiles(&self) -> Result<Vec<ExitProfile>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT profile_id, name, description, config, is_active, created_by, created_ts, updated_ts
            FROM exit_profiles ORDER BY profile_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(profile_from_row).collect()
    }

    /// Insert or replace a profile, preserving its original creation time.
    pub async fn upsert_profile(&self, profile: &ExitProfile) -> Result<(), sqlx::Error> {
        let config_json = serde_json::to_string(&profile.config).map_err(decode_err)?;
        sqlx::query(
            r#"
            INSERT INTO exit_profiles
            (profile_id, name, description, config, is_active, created_by, created_ts, updated_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(profile_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                config = excluded.config,
                is_active = excluded.is_active,
                updated_ts = excluded.updated_ts
            "#,
        )
        .bind(&profile.profile_id)
        .bind(&profile.name)
        .bind(profile.description.as_deref())
        .bind(config_json)
        .bind(profile.is_active as i64)
        .bind(profile.created_by.as_deref())
        .bind(profile.created_ts.as_i64())
        .bind(profile.updated_ts.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Symbol overrides
    // =========================================================================

    pub async fn get_symbol_override(
        &self,
        symbol: &Symbol,
    ) -> Result<Option<SymbolExitOverride>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT symbol, profile_id, enabled, effective_from, reason, created_by, updated_ts
            FROM symbol_exit_overrides WHERE symbol = ?
            "#,
        )
        .bind(symbol.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(override_from_row).transpose()
    }

    pub async fn list_symbol_overrides(&self) -> Result<Vec<SymbolExitOverride>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, profile_id, enabled, effective_from, reason, created_by, updated_ts
            FROM symbol_exit_overrides ORDER BY symbol ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(override_from_row).collect()
    }

    pub async fn upsert_symbol_override(&self, ov: &SymbolExitOverride) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO symbol_exit_overrides
            (symbol, profile_id, enabled, effective_from, reason, created_by, updated_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                profile_id = excluded.profile_id,
                enabled = excluded.enabled,
                effective_from = excluded.effective_from,
                reason = excluded.reason,
                created_by = excluded.created_by,
                updated_ts = excluded.updated_ts
            "#,
        )
        .bind(ov.symbol.as_str())
        .bind(&ov.profile_id)
        .bind(ov.enabled as i64)
        .bind(ov.effective_from.map(|t| t.as_i64()))
        .bind(ov.reason.as_deref())
        .bind(ov.created_by.as_deref())
        .bind(ov.updated_ts.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_symbol_override(&self, symbol: &Symbol) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM symbol_exit_overrides WHERE symbol = ?")
            .bind(symbol.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Global control
    // =========================================================================

    /// Read the control singleton; RUNNING if the row is somehow missing.
    pub async fn get_control(&self) -> Result<ExitControl, sqlx::Error> {
        let row = sqlx::query(
            "SELECT mode, reason, updated_by, updated_ts FROM exit_control WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(ExitControl {
                mode: enum_col(&row, "mode")?,
                reason: row.try_get("reason")?,
                updated_by: row.try_get("updated_by")?,
                updated_ts: TimeMs::new(row.try_get("updated_ts")?),
            }),
            None => Ok(ExitControl::default()),
        }
    }

    pub async fn set_control(&self, control: &ExitControl) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO exit_control (id, mode, reason, updated_by, updated_ts)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                mode = excluded.mode,
                reason = excluded.reason,
                updated_by = excluded.updated_by,
                updated_ts = excluded.updated_ts
            "#,
        )
        .bind(control.mode.as_str())
        .bind(control.reason.as_deref())
        .bind(control.updated_by.as_deref())
        .bind(control.updated_ts.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use super::*;
    use crate::domain::{ControlMode, Decimal};

    #[tokio::test]
    async fn test_control_seeded_running() {
        let (repo, _temp) = setup_test_db().await;
        assert_eq!(repo.get_control().await.unwrap().mode, ControlMode::Running);

        repo.set_control(&ExitControl {
            mode: ControlMode::PauseAll,
            reason: Some("halt".to_string()),
            updated_by: Some("ops".to_string()),
            updated_ts: TimeMs::new(9),
        })
        .await
        .unwrap();
        let control = repo.get_control().await.unwrap();
        assert_eq!(control.mode, ControlMode::PauseAll);
        assert_eq!(control.reason.as_deref(), Some("halt"));
    }

    #[tokio::test]
    async fn test_profile_upsert_keeps_created_ts() {
        let (repo, _temp) = setup_test_db().await;
        let mut profile = ExitProfile::builtin_default();
        profile.profile_id = "tight".to_string();
        profile.created_ts = TimeMs::new(1);
        profile.updated_ts = TimeMs::new(1);
        repo.upsert_profile(&profile).await.unwrap();

        profile.config.sl2.base_pct = Decimal::from_str_canonical("-0.04").unwrap();
        profile.created_ts = TimeMs::new(50);
        profile.updated_ts = TimeMs::new(50);
        repo.upsert_profile(&profile).await.unwrap();

        let loaded = repo.get_profile("tight").await.unwrap().unwrap();
        assert_eq!(loaded.created_ts, TimeMs::new(1));
        assert_eq!(loaded.updated_ts, TimeMs::new(50));
        assert_eq!(
            loaded.config.sl2.base_pct,
            Decimal::from_str_canonical("-0.04").unwrap()
        );
        assert_eq!(repo.list_profiles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_override_crud() {
        let (repo, _temp) = setup_test_db().await;
        let ov = SymbolExitOverride {
            symbol: Symbol::new("005930"),
            profile_id: "tight".to_string(),
            enabled: true,
            effective_from: None,
            reason: Some("earnings".to_string()),
            created_by: None,
            updated_ts: TimeMs::new(1),
        };
        repo.upsert_symbol_override(&ov).await.unwrap();
        assert_eq!(
            repo.get_symbol_override(&ov.symbol).await.unwrap(),
            Some(ov.clone())
        );
        assert_eq!(repo.list_symbol_overrides().await.unwrap().len(), 1);
        assert!(repo.delete_symbol_override(&ov.symbol).await.unwrap());
        assert!(!repo.delete_symbol_override(&ov.symbol).await.unwrap());
    }
}
