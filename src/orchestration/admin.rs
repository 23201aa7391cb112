//! Operator actions behind the admin HTTP surface.

use super::intent_ledger::{IntentLedger, RecordOutcome};
use super::profile_resolver::{ProfileResolver, ProfileSource};
use crate::db::Repository;
use crate::domain::{
    ControlMode, Decimal, ExitControl, ExitMode, ExitProfile, ExitProfileConfig, ExitState,
    IntentStatus, OrderIntent, OrderType, Position, PositionStatus, ProfileValidationError,
    Symbol, SymbolExitOverride, TimeMs, DEFAULT_PROFILE_ID,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Conflict(String),
    #[error("no available quantity")]
    NoAvailableQty,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<ProfileValidationError> for AdminError {
    fn from(err: ProfileValidationError) -> Self {
        AdminError::Invalid(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualExitRequest {
    pub qty: Option<i64>,
    #[serde(default = "default_manual_order_type")]
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
}

fn default_manual_order_type() -> OrderType {
    OrderType::Mkt
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlUpdate {
    pub mode: ControlMode,
    pub reason: Option<String>,
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: String,
    pub description: Option<String>,
    pub config: ExitProfileConfig,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideUpdate {
    pub profile_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub effective_from: Option<TimeMs>,
    pub reason: Option<String>,
    pub created_by: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Position with its exit state and the profile currently governing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionStateView {
    pub position: Position,
    pub exit_state: Option<ExitState>,
    pub profile_id: String,
    pub profile_source: String,
    pub available_qty: i64,
}

fn source_label(source: ProfileSource) -> &'static str {
    match source {
        ProfileSource::Position => "POSITION",
        ProfileSource::SymbolOverride => "SYMBOL_OVERRIDE",
        ProfileSource::StoredDefault => "DEFAULT",
        ProfileSource::Builtin => "BUILTIN",
    }
}

#[derive(Debug, Clone)]
pub struct AdminService {
    repo: Arc<Repository>,
    ledger: IntentLedger,
    resolver: ProfileResolver,
}

impl AdminService {
    pub fn new(repo: Arc<Repository>, ledger: IntentLedger) -> Self {
        Self {
            resolver: ProfileResolver::new(repo.clone()),
            repo,
            ledger,
        }
    }

    async fn position(&self, position_id: &str) -> Result<Position, AdminError> {
        self.repo
            .get_position(position_id)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("position {}", position_id)))
    }

    // =========================================================================
    // Intents
    // =========================================================================

    pub async fn create_manual_intent(
        &self,
        position_id: &str,
        request: &ManualExitRequest,
        now: TimeMs,
    ) -> Result<OrderIntent, AdminError> {
        let position = self.position(position_id).await?;
        if position.status == PositionStatus::Closed {
            return Err(AdminError::Invalid("position is closed".to_string()));
        }
        if position.exit_mode == ExitMode::Disabled {
            return Err(AdminError::Invalid("exit is disabled for this position".to_string()));
        }
        if matches!(request.qty, Some(q) if q <= 0) {
            return Err(AdminError::Invalid("qty must be positive".to_string()));
        }
        let limit_price = match (request.order_type, request.limit_price) {
            (OrderType::Lmt, Some(p)) if p.is_positive() => Some(p),
            (OrderType::Lmt, _) => {
                return Err(AdminError::Invalid(
                    "limit orders need a positive limitPrice".to_string(),
                ))
            }
            (OrderType::Mkt, _) => None,
        };

        match self
            .ledger
            .record_manual(&position, request.qty, request.order_type, limit_price, now)
            .await?
        {
            RecordOutcome::Created(intent) => Ok(intent),
            RecordOutcome::NoAvailableQty => Err(AdminError::NoAvailableQty),
            RecordOutcome::AlreadyRecorded | RecordOutcome::Suppressed { .. } => Err(
                AdminError::Conflict("manual intent was not recorded".to_string()),
            ),
        }
    }

    pub async fn approve_intent(&self, intent_id: &str, now: TimeMs) -> Result<OrderIntent, AdminError> {
        self.transition_intent(intent_id, &[IntentStatus::PendingApproval], IntentStatus::New, now)
            .await
    }

    pub async fn cancel_intent(&self, intent_id: &str, now: TimeMs) -> Result<OrderIntent, AdminError> {
        self.transition_intent(
            intent_id,
            &[IntentStatus::New, IntentStatus::PendingApproval],
            IntentStatus::Cancelled,
            now,
        )
        .await
    }

    async fn transition_intent(
        &self,
        intent_id: &str,
        from: &[IntentStatus],
        to: IntentStatus,
        now: TimeMs,
    ) -> Result<OrderIntent, AdminError> {
        let intent = self
            .repo
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("intent {}", intent_id)))?;
        let message = (to == IntentStatus::Cancelled).then_some("cancelled by operator");
        if !self
            .repo
            .transition_intent_status(intent_id, from, to, message, now)
            .await?
        {
            return Err(AdminError::Conflict(format!(
                "intent {} is {}, cannot move to {}",
                intent_id, intent.status, to
            )));
        }
        info!(intent_id = %intent_id, from = %intent.status, to = %to, "Intent status changed by operator");
        self.repo
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("intent {}", intent_id)))
    }

    pub async fn list_intents(&self, position_id: &str) -> Result<Vec<OrderIntent>, AdminError> {
        self.position(position_id).await?;
        Ok(self.repo.list_intents_for_position(position_id).await?)
    }

    // =========================================================================
    // Control
    // =========================================================================

    pub async fn get_control(&self) -> Result<ExitControl, AdminError> {
        Ok(self.repo.get_control().await?)
    }

    pub async fn set_control(&self, update: ControlUpdate, now: TimeMs) -> Result<ExitControl, AdminError> {
        let control = ExitControl {
            mode: update.mode,
            reason: update.reason,
            updated_by: update.updated_by,
            updated_ts: now,
        };
        self.repo.set_control(&control).await?;
        info!(mode = %control.mode, updated_by = ?control.updated_by, "Exit control changed");
        Ok(control)
    }

    // =========================================================================
    // Profiles and overrides
    // =========================================================================

    pub async fn list_profiles(&self) -> Result<Vec<ExitProfile>, AdminError> {
        Ok(self.repo.list_profiles().await?)
    }

    pub async fn get_profile(&self, profile_id: &str) -> Result<ExitProfile, AdminError> {
        self.repo
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("profile {}", profile_id)))
    }

    pub async fn put_profile(
        &self,
        profile_id: &str,
        update: ProfileUpdate,
        now: TimeMs,
    ) -> Result<ExitProfile, AdminError> {
        if profile_id.trim().is_empty() {
            return Err(AdminError::Invalid("profile id must not be empty".to_string()));
        }
        update.config.validate()?;
        let profile = ExitProfile {
            profile_id: profile_id.to_string(),
            name: update.name,
            description: update.description,
            config: update.config,
            is_active: update.is_active,
            created_by: update.created_by,
            created_ts: now,
            updated_ts: now,
        };
        self.repo.upsert_profile(&profile).await?;
        info!(profile_id = %profile_id, "Exit profile saved");
        self.get_profile(profile_id).await
    }

    pub async fn list_overrides(&self) -> Result<Vec<SymbolExitOverride>, AdminError> {
        Ok(self.repo.list_symbol_overrides().await?)
    }

    pub async fn get_override(&self, symbol: &Symbol) -> Result<SymbolExitOverride, AdminError> {
        self.repo
            .get_symbol_override(symbol)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("override for {}", symbol)))
    }

    pub async fn put_override(
        &self,
        symbol: Symbol,
        update: OverrideUpdate,
        now: TimeMs,
    ) -> Result<SymbolExitOverride, AdminError> {
        if symbol.is_empty() {
            return Err(AdminError::Invalid("symbol must not be empty".to_string()));
        }
        if update.profile_id != DEFAULT_PROFILE_ID
            && self.repo.get_profile(&update.profile_id).await?.is_none()
        {
            return Err(AdminError::Invalid(format!(
                "unknown profile {}",
                update.profile_id
            )));
        }
        let ov = SymbolExitOverride {
            symbol,
            profile_id: update.profile_id,
            enabled: update.enabled,
            effective_from: update.effective_from,
            reason: update.reason,
            created_by: update.created_by,
            updated_ts: now,
        };
        self.repo.upsert_symbol_override(&ov).await?;
        info!(symbol = %ov.symbol, profile_id = %ov.profile_id, enabled = ov.enabled, "Symbol override saved");
        Ok(ov)
    }

    pub async fn delete_override(&self, symbol: &Symbol) -> Result<(), AdminError> {
        if !self.repo.delete_symbol_override(symbol).await? {
            return Err(AdminError::NotFound(format!("override for {}", symbol)));
        }
        info!(symbol = %symbol, "Symbol override deleted");
        Ok(())
    }

    // =========================================================================
    // Positions
    // =========================================================================

    pub async fn position_state(&self, position_id: &str, now: TimeMs) -> Result<PositionStateView, AdminError> {
        let position = self.position(position_id).await?;
        let exit_state = self.repo.get_exit_state(position_id).await?;
        let resolved = self.resolver.resolve(&position, now).await?;
        let available_qty = self.repo.available_qty(position_id).await?;
        Ok(PositionStateView {
            position,
            exit_state,
            profile_id: resolved.profile_id,
            profile_source: source_label(resolved.source).to_string(),
            available_qty,
        })
    }

    /// Store the ATR (fraction of price) used to scale this position's thresholds.
    pub async fn set_cached_atr(
        &self,
        position_id: &str,
        atr: Option<Decimal>,
        now: TimeMs,
    ) -> Result<ExitState, AdminError> {
        if matches!(atr, Some(a) if a.is_negative()) {
            return Err(AdminError::Invalid("atr must not be negative".to_string()));
        }
        let position = self.position(position_id).await?;
        self.repo
            .get_or_create_exit_state(position_id, position.avg_price, now)
            .await?;
        self.repo.set_cached_atr(position_id, atr, now).await?;
        self.repo
            .get_exit_state(position_id)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("exit state for {}", position_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::{seed_position, setup_test_db};
    use crate::domain::{IntentType, ReasonCode};

    async fn setup(require_approval: bool) -> (Arc<Repository>, AdminService, tempfile::TempDir) {
        let (repo, temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let admin = AdminService::new(repo.clone(), IntentLedger::new(repo.clone(), require_approval));
        (repo, admin, temp)
    }

    fn market(qty: Option<i64>) -> ManualExitRequest {
        ManualExitRequest {
            qty,
            order_type: OrderType::Mkt,
            limit_price: None,
        }
    }

    #[tokio::test]
    async fn test_manual_intent_defaults_to_available_qty() {
        let (repo, admin, _temp) = setup(false).await;
        let p = seed_position(&repo, "005930", 100, "70000").await;

        let first = admin
            .create_manual_intent(&p.position_id, &market(Some(40)), TimeMs::new(1))
            .await
            .unwrap();
        assert_eq!(first.intent_type, IntentType::ExitPartial);
        assert_eq!(first.reason_code, ReasonCode::Manual);
        assert_eq!(first.status, IntentStatus::New);

        let second = admin
            .create_manual_intent(&p.position_id, &market(None), TimeMs::new(2))
            .await
            .unwrap();
        assert_eq!(second.qty, 60);
        assert_ne!(first.action_key, second.action_key);

        let err = admin
            .create_manual_intent(&p.position_id, &market(None), TimeMs::new(3))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::NoAvailableQty));
    }

    #[tokio::test]
    async fn test_manual_intent_rejected_when_disabled() {
        let (repo, admin, _temp) = setup(false).await;
        let p = seed_position(&repo, "005930", 100, "70000").await;
        repo.set_position_exit_mode(&p.position_id, ExitMode::Disabled, None, TimeMs::new(1))
            .await
            .unwrap();

        let err = admin
            .create_manual_intent(&p.position_id, &market(None), TimeMs::new(2))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Invalid(_)));

        let missing = admin
            .create_manual_intent("nope", &market(None), TimeMs::new(2))
            .await
            .unwrap_err();
        assert!(matches!(missing, AdminError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_limit_manual_intent_requires_price() {
        let (repo, admin, _temp) = setup(false).await;
        let p = seed_position(&repo, "005930", 100, "70000").await;
        let request = ManualExitRequest {
            qty: None,
            order_type: OrderType::Lmt,
            limit_price: None,
        };
        let err = admin
            .create_manual_intent(&p.position_id, &request, TimeMs::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_approve_then_cancel_rules() {
        let (repo, admin, _temp) = setup(true).await;
        let p = seed_position(&repo, "005930", 100, "70000").await;
        let intent = OrderIntent::new(
            p.position_id.clone(),
            "acct-1",
            p.symbol.clone(),
            IntentType::ExitPartial,
            30,
            OrderType::Mkt,
            None,
            ReasonCode::Tp1,
            format!("{}:OPEN:TP1", p.position_id),
            IntentStatus::PendingApproval,
            TimeMs::new(1),
        );
        repo.insert_intent(&intent).await.unwrap();

        let approved = admin.approve_intent(&intent.intent_id, TimeMs::new(2)).await.unwrap();
        assert_eq!(approved.status, IntentStatus::New);

        let again = admin.approve_intent(&intent.intent_id, TimeMs::new(3)).await.unwrap_err();
        assert!(matches!(again, AdminError::Conflict(_)));

        let cancelled = admin.cancel_intent(&intent.intent_id, TimeMs::new(4)).await.unwrap();
        assert_eq!(cancelled.status, IntentStatus::Cancelled);
        assert!(matches!(
            admin.cancel_intent(&intent.intent_id, TimeMs::new(5)).await,
            Err(AdminError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_put_profile_validates_and_resolves() {
        let (repo, admin, _temp) = setup(false).await;
        let mut bad = ExitProfileConfig::default();
        bad.tp1.base_pct = Decimal::from_str_canonical("-0.01").unwrap();
        let err = admin
            .put_profile(
                "tight",
                ProfileUpdate {
                    name: "Tight".to_string(),
                    description: None,
                    config: bad,
                    is_active: true,
                    created_by: None,
                },
                TimeMs::new(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Invalid(_)));

        admin
            .put_profile(
                "tight",
                ProfileUpdate {
                    name: "Tight".to_string(),
                    description: None,
                    config: ExitProfileConfig::default(),
                    is_active: true,
                    created_by: None,
                },
                TimeMs::new(1),
            )
            .await
            .unwrap();
        admin
            .put_override(
                Symbol::new("005930"),
                OverrideUpdate {
                    profile_id: "tight".to_string(),
                    enabled: true,
                    effective_from: None,
                    reason: None,
                    created_by: None,
                },
                TimeMs::new(2),
            )
            .await
            .unwrap();

        let p = seed_position(&repo, "005930", 10, "70000").await;
        let view = admin.position_state(&p.position_id, TimeMs::new(3)).await.unwrap();
        assert_eq!(view.profile_id, "tight");
        assert_eq!(view.profile_source, "SYMBOL_OVERRIDE");
        assert_eq!(view.available_qty, 10);
    }

    #[tokio::test]
    async fn test_override_with_unknown_profile_rejected() {
        let (_repo, admin, _temp) = setup(false).await;
        let err = admin
            .put_override(
                Symbol::new("005930"),
                OverrideUpdate {
                    profile_id: "ghost".to_string(),
                    enabled: true,
                    effective_from: None,
                    reason: None,
                    created_by: None,
                },
                TimeMs::new(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Invalid(_)));
        assert!(matches!(
            admin.delete_override(&Symbol::new("005930")).await,
            Err(AdminError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_cached_atr_creates_state() {
        let (repo, admin, _temp) = setup(false).await;
        let p = seed_position(&repo, "005930", 10, "70000").await;
        let atr = Decimal::from_str_canonical("0.03").unwrap();
        let state = admin
            .set_cached_atr(&p.position_id, Some(atr), TimeMs::new(5))
            .await
            .unwrap();
        assert_eq!(state.cached_atr, Some(atr));
    }
}
