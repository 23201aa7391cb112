//! Records exit intents: severity gate, available-quantity clamp and the
//! idempotent insert keyed by action key.

use crate::db::Repository;
use crate::domain::{
    action_key, Decimal, ExitPhase, IntentStatus, IntentType, OrderIntent, OrderType, Position,
    ReasonCode, TimeMs,
};
use crate::engine::ExitTrigger;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Created(OrderIntent),
    /// An intent with the same action key already exists.
    AlreadyRecorded,
    /// An active intent at least as severe is in flight.
    Suppressed { by: ReasonCode },
    NoAvailableQty,
}

#[derive(Debug, Clone)]
pub struct IntentLedger {
    repo: Arc<Repository>,
    require_approval: bool,
}

impl IntentLedger {
    pub fn new(repo: Arc<Repository>, require_approval: bool) -> Self {
        Self {
            repo,
            require_approval,
        }
    }

    /// Record the intent for an automatic trigger.
    pub async fn record_trigger(
        &self,
        position: &Position,
        phase: ExitPhase,
        trigger: &ExitTrigger,
        now: TimeMs,
    ) -> Result<RecordOutcome, sqlx::Error> {
        let active = self
            .repo
            .active_intents_for_position(&position.position_id)
            .await?;
        if let Some(top) = active
            .iter()
            .map(|i| i.reason_code)
            .max_by_key(|r| r.severity())
        {
            if trigger.reason_code.severity() <= top.severity() {
                debug!(
                    position_id = %position.position_id,
                    reason = %trigger.reason_code,
                    active = %top,
                    "Trigger suppressed by active intent"
                );
                return Ok(RecordOutcome::Suppressed { by: top });
            }
        }

        let available = self.repo.available_qty(&position.position_id).await?;
        if available <= 0 {
            return Ok(RecordOutcome::NoAvailableQty);
        }
        let qty = trigger.qty.min(available);
        if qty < trigger.qty {
            debug!(
                position_id = %position.position_id,
                trigger_qty = trigger.qty,
                available_qty = available,
                "Clamping exit quantity to available"
            );
        }

        let status = if self.require_approval {
            IntentStatus::PendingApproval
        } else {
            IntentStatus::New
        };
        let intent = OrderIntent::new(
            position.position_id.clone(),
            position.account_id.clone(),
            position.symbol.clone(),
            intent_type_for(qty, position.qty),
            qty,
            trigger.order_type,
            trigger.limit_price,
            trigger.reason_code,
            action_key(&position.position_id, phase, trigger.reason_code),
            status,
            now,
        );

        if !self.repo.insert_intent(&intent).await? {
            debug!(action_key = %intent.action_key, "Intent already recorded");
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        info!(
            position_id = %position.position_id,
            symbol = %position.symbol,
            reason = %intent.reason_code,
            qty = intent.qty,
            intent_type = intent.intent_type.as_str(),
            status = %intent.status,
            "Exit intent created"
        );
        Ok(RecordOutcome::Created(intent))
    }

    /// Record an operator-requested exit. Each call is a distinct intent.
    ///
    /// `qty` defaults to, and is clamped to, the available quantity.
    pub async fn record_manual(
        &self,
        position: &Position,
        qty: Option<i64>,
        order_type: OrderType,
        limit_price: Option<Decimal>,
        now: TimeMs,
    ) -> Result<RecordOutcome, sqlx::Error> {
        let available = self.repo.available_qty(&position.position_id).await?;
        if available <= 0 {
            return Ok(RecordOutcome::NoAvailableQty);
        }
        let qty = qty.unwrap_or(available).min(available);
        if qty <= 0 {
            return Ok(RecordOutcome::NoAvailableQty);
        }

        let intent = OrderIntent::new(
            position.position_id.clone(),
            position.account_id.clone(),
            position.symbol.clone(),
            intent_type_for(qty, position.qty),
            qty,
            order_type,
            limit_price,
            ReasonCode::Manual,
            format!(
                "{}:{}:{}",
                position.position_id,
                ReasonCode::Manual,
                uuid::Uuid::new_v4()
            ),
            IntentStatus::New,
            now,
        );

        if !self.repo.insert_intent(&intent).await? {
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        info!(
            position_id = %position.position_id,
            symbol = %position.symbol,
            qty = qty,
            "Manual exit intent created"
        );
        Ok(RecordOutcome::Created(intent))
    }
}

fn intent_type_for(qty: i64, position_qty: i64) -> IntentType {
    if qty >= position_qty {
        IntentType::ExitFull
    } else {
        IntentType::ExitPartial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::{seed_position, setup_test_db};

    fn trigger(reason: ReasonCode, qty: i64) -> ExitTrigger {
        ExitTrigger {
            reason_code: reason,
            qty,
            order_type: OrderType::Mkt,
            limit_price: None,
            price: Decimal::from_i64(100),
            pnl_pct: Decimal::zero(),
        }
    }

    #[tokio::test]
    async fn test_created_and_idempotent() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let p = seed_position(&repo, "005930", 100, "70000").await;
        let ledger = IntentLedger::new(repo.clone(), false);

        let outcome = ledger
            .record_trigger(&p, ExitPhase::Open, &trigger(ReasonCode::Tp1, 25), TimeMs::new(1))
            .await
            .unwrap();
        let RecordOutcome::Created(intent) = outcome else {
            panic!("expected created, got {:?}", outcome);
        };
        assert_eq!(intent.status, IntentStatus::New);
        assert_eq!(intent.intent_type, IntentType::ExitPartial);
        assert_eq!(intent.action_key, format!("{}:OPEN:TP1", p.position_id));

        // same key again, now outranked by nothing but itself
        let again = ledger
            .record_trigger(&p, ExitPhase::Open, &trigger(ReasonCode::Tp1, 25), TimeMs::new(2))
            .await
            .unwrap();
        assert_eq!(again, RecordOutcome::Suppressed { by: ReasonCode::Tp1 });
    }

    #[tokio::test]
    async fn test_more_severe_trigger_passes_and_is_clamped() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let p = seed_position(&repo, "005930", 100, "70000").await;
        let ledger = IntentLedger::new(repo.clone(), false);

        ledger
            .record_trigger(&p, ExitPhase::Open, &trigger(ReasonCode::Tp1, 25), TimeMs::new(1))
            .await
            .unwrap();
        let outcome = ledger
            .record_trigger(&p, ExitPhase::Open, &trigger(ReasonCode::Sl2, 100), TimeMs::new(2))
            .await
            .unwrap();
        let RecordOutcome::Created(intent) = outcome else {
            panic!("expected created");
        };
        assert_eq!(intent.qty, 75);
        assert_eq!(intent.intent_type, IntentType::ExitPartial);

        let outcome = ledger
            .record_trigger(&p, ExitPhase::Open, &trigger(ReasonCode::Flatten, 100), TimeMs::new(3))
            .await
            .unwrap();
        assert_eq!(outcome, RecordOutcome::NoAvailableQty);
    }

    #[tokio::test]
    async fn test_requires_approval() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let p = seed_position(&repo, "005930", 100, "70000").await;
        let ledger = IntentLedger::new(repo.clone(), true);

        let outcome = ledger
            .record_trigger(&p, ExitPhase::Open, &trigger(ReasonCode::Sl2, 100), TimeMs::new(1))
            .await
            .unwrap();
        let RecordOutcome::Created(intent) = outcome else {
            panic!("expected created");
        };
        assert_eq!(intent.status, IntentStatus::PendingApproval);
        assert_eq!(intent.intent_type, IntentType::ExitFull);
    }

    #[tokio::test]
    async fn test_manual_intents_are_distinct_and_not_severity_gated() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let p = seed_position(&repo, "005930", 100, "70000").await;
        let ledger = IntentLedger::new(repo.clone(), false);

        for expected in [30, 70] {
            let qty = if expected == 30 { Some(30) } else { None };
            let outcome = ledger
                .record_manual(&p, qty, OrderType::Mkt, None, TimeMs::new(1))
                .await
                .unwrap();
            let RecordOutcome::Created(intent) = outcome else {
                panic!("expected created");
            };
            assert_eq!(intent.qty, expected);
            assert_eq!(intent.reason_code, ReasonCode::Manual);
        }

        // manual intents never outrank automatic triggers
        let outcome = ledger
            .record_trigger(&p, ExitPhase::Open, &trigger(ReasonCode::Time, 100), TimeMs::new(2))
            .await
            .unwrap();
        assert_eq!(outcome, RecordOutcome::NoAvailableQty);
    }
}
