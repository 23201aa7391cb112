//! Picks the exit profile that governs a position.

use crate::db::Repository;
use crate::domain::{ExitProfile, ExitProfileConfig, Position, TimeMs, DEFAULT_PROFILE_ID};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a resolved profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    Position,
    SymbolOverride,
    StoredDefault,
    Builtin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub profile_id: String,
    pub source: ProfileSource,
    pub config: ExitProfileConfig,
}

impl ResolvedProfile {
    fn from_profile(profile: ExitProfile, source: ProfileSource) -> Self {
        Self {
            profile_id: profile.profile_id,
            source,
            config: profile.config,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileResolver {
    repo: Arc<Repository>,
}

impl ProfileResolver {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Position profile, then symbol override, then the stored `default`,
    /// then the built-in profile. A missing, inactive or undecodable profile
    /// falls through to the next level.
    ///
    /// # Errors
    /// Returns an error only if the database itself fails.
    pub async fn resolve(&self, position: &Position, now: TimeMs) -> Result<ResolvedProfile, sqlx::Error> {
        if let Some(id) = position.exit_profile_id.as_deref() {
            if let Some(profile) = self.active_profile(id).await? {
                return Ok(ResolvedProfile::from_profile(profile, ProfileSource::Position));
            }
            debug!(position_id = %position.position_id, profile_id = %id, "Position profile unavailable, falling through");
        }

        if let Some(ov) = self.repo.get_symbol_override(&position.symbol).await? {
            if ov.is_effective(now) {
                if let Some(profile) = self.active_profile(&ov.profile_id).await? {
                    return Ok(ResolvedProfile::from_profile(
                        profile,
                        ProfileSource::SymbolOverride,
                    ));
                }
            }
        }

        if let Some(profile) = self.active_profile(DEFAULT_PROFILE_ID).await? {
            return Ok(ResolvedProfile::from_profile(profile, ProfileSource::StoredDefault));
        }

        Ok(ResolvedProfile::from_profile(
            ExitProfile::builtin_default(),
            ProfileSource::Builtin,
        ))
    }

    async fn active_profile(&self, profile_id: &str) -> Result<Option<ExitProfile>, sqlx::Error> {
        match self.repo.get_profile(profile_id).await {
            Ok(profile) => Ok(profile.filter(|p| p.is_active)),
            Err(sqlx::Error::Decode(e)) => {
                warn!(profile_id = %profile_id, error = %e, "Ignoring undecodable profile");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::{seed_position, setup_test_db};
    use crate::domain::{Decimal, ExitMode, SymbolExitOverride};

    fn profile(id: &str, active: bool, tp1: i64) -> ExitProfile {
        let mut config = ExitProfileConfig::default();
        config.tp1.base_pct = Decimal::from_i64(tp1) / Decimal::hundred();
        ExitProfile {
            profile_id: id.to_string(),
            name: id.to_string(),
            description: None,
            config,
            is_active: active,
            created_by: None,
            created_ts: TimeMs::new(1),
            updated_ts: TimeMs::new(1),
        }
    }

    fn override_to(symbol: &str, profile_id: &str, effective_from: Option<i64>) -> SymbolExitOverride {
        SymbolExitOverride {
            symbol: crate::domain::Symbol::new(symbol),
            profile_id: profile_id.to_string(),
            enabled: true,
            effective_from: effective_from.map(TimeMs::new),
            reason: None,
            created_by: None,
            updated_ts: TimeMs::new(1),
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_builtin() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let p = seed_position(&repo, "005930", 10, "100").await;

        let resolved = ProfileResolver::new(repo).resolve(&p, TimeMs::new(10)).await.unwrap();
        assert_eq!(resolved.source, ProfileSource::Builtin);
        assert_eq!(resolved.config, ExitProfileConfig::default());
    }

    #[tokio::test]
    async fn test_resolution_order() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let mut p = seed_position(&repo, "005930", 10, "100").await;
        let resolver = ProfileResolver::new(repo.clone());
        let now = TimeMs::new(10);

        repo.upsert_profile(&profile(DEFAULT_PROFILE_ID, true, 6)).await.unwrap();
        assert_eq!(
            resolver.resolve(&p, now).await.unwrap().source,
            ProfileSource::StoredDefault
        );

        repo.upsert_profile(&profile("aggressive", true, 4)).await.unwrap();
        repo.upsert_symbol_override(&override_to("005930", "aggressive", Some(5)))
            .await
            .unwrap();
        let resolved = resolver.resolve(&p, now).await.unwrap();
        assert_eq!(resolved.source, ProfileSource::SymbolOverride);
        assert_eq!(resolved.profile_id, "aggressive");

        repo.upsert_profile(&profile("mine", true, 9)).await.unwrap();
        repo.set_position_exit_mode(&p.position_id, ExitMode::Enabled, Some("mine"), now)
            .await
            .unwrap();
        p.exit_profile_id = Some("mine".to_string());
        assert_eq!(resolver.resolve(&p, now).await.unwrap().profile_id, "mine");
    }

    #[tokio::test]
    async fn test_skips_inactive_and_future_overrides() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let mut p = seed_position(&repo, "005930", 10, "100").await;
        let resolver = ProfileResolver::new(repo.clone());

        repo.upsert_profile(&profile("off", false, 4)).await.unwrap();
        repo.upsert_profile(&profile("later", true, 4)).await.unwrap();
        repo.upsert_symbol_override(&override_to("005930", "later", Some(1_000)))
            .await
            .unwrap();
        p.exit_profile_id = Some("off".to_string());

        let resolved = resolver.resolve(&p, TimeMs::new(10)).await.unwrap();
        assert_eq!(resolved.source, ProfileSource::Builtin);

        let resolved = resolver.resolve(&p, TimeMs::new(1_000)).await.unwrap();
        assert_eq!(resolved.profile_id, "later");
    }
}
