//! Feeds filled exit orders back into the position's exit state machine.

use super::profile_resolver::ProfileResolver;
use crate::db::Repository;
use crate::domain::{IntentStatus, Order, TimeMs};
use crate::engine::{on_exit_filled, ExitFill};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FsmHandler {
    repo: Arc<Repository>,
    resolver: ProfileResolver,
}

impl FsmHandler {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            resolver: ProfileResolver::new(repo.clone()),
            repo,
        }
    }

    /// Mark the order's intent FILLED and advance the exit phase.
    ///
    /// Returns true if the exit state changed. Orders without an intent, or
    /// whose intent is already FILLED, are ignored.
    pub async fn on_order_filled(&self, order: &Order, now: TimeMs) -> Result<bool, sqlx::Error> {
        let Some(intent_id) = order.intent_id.as_deref() else {
            return Ok(false);
        };
        let Some(intent) = self.repo.get_intent(intent_id).await? else {
            warn!(order_id = %order.order_id, intent_id = %intent_id, "Filled order references unknown intent");
            return Ok(false);
        };

        if !self
            .repo
            .transition_intent_status(
                &intent.intent_id,
                &[IntentStatus::Submitted],
                IntentStatus::Filled,
                None,
                now,
            )
            .await?
        {
            debug!(intent_id = %intent.intent_id, status = %intent.status, "Intent not in SUBMITTED, skipping FSM");
            return Ok(false);
        }
        if !intent.intent_type.is_exit() {
            return Ok(false);
        }

        let Some(position) = self.repo.get_position(&intent.position_id).await? else {
            warn!(position_id = %intent.position_id, "Filled exit intent for missing position");
            return Ok(false);
        };
        let Some(fill_price) = self.repo.order_fill_vwap(&order.order_id).await? else {
            warn!(order_id = %order.order_id, "Filled order has no fills");
            return Ok(false);
        };

        let profile = self.resolver.resolve(&position, now).await?;
        let mut state = self
            .repo
            .get_or_create_exit_state(&position.position_id, position.avg_price, now)
            .await?;
        let before = state.phase;
        let fill = ExitFill {
            reason_code: intent.reason_code,
            intent_type: intent.intent_type,
            fill_price,
        };

        let changed = on_exit_filled(
            &mut state,
            &fill,
            position.avg_price,
            profile.config.stop_floor.be_profit_pct,
            now,
        );
        if changed {
            self.repo.save_exit_state(&state).await?;
            info!(
                position_id = %position.position_id,
                reason = %intent.reason_code,
                from = before.as_str(),
                to = state.phase.as_str(),
                "Exit phase advanced"
            );
        }
        Ok(changed)
    }
}
