//! Periodic cleanup of unsubmitted intents.
//!
//! Severity-aware: an unsubmitted intent is cancelled only when a strictly
//! more severe intent is active on the same position, or when it is a stop
//! whose loss has recovered.

use crate::db::Repository;
use crate::domain::{Decimal, IntentStatus, OrderIntent, ReasonCode, TimeMs};
use crate::engine::pnl_pct;
use crate::pricefeed::PriceFeed;
use rust_decimal::Decimal as RustDecimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

const UNSUBMITTED: [IntentStatus; 2] = [IntentStatus::New, IntentStatus::PendingApproval];

/// PnL above which an unsubmitted stop intent no longer applies.
fn recovery_threshold(reason: ReasonCode) -> Option<Decimal> {
    match reason {
        ReasonCode::Sl1 => Some(Decimal::new(RustDecimal::new(-3, 2))),
        ReasonCode::Sl2 => Some(Decimal::new(RustDecimal::new(-4, 2))),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IntentReconcileSummary {
    pub superseded: usize,
    pub recovered: usize,
}

#[derive(Debug, Clone)]
pub struct IntentReconciler {
    repo: Arc<Repository>,
    prices: Arc<dyn PriceFeed>,
    price_freshness_ms: i64,
}

impl IntentReconciler {
    pub fn new(repo: Arc<Repository>, prices: Arc<dyn PriceFeed>, price_freshness_ms: i64) -> Self {
        Self {
            repo,
            prices,
            price_freshness_ms,
        }
    }

    pub async fn reconcile(&self, now: TimeMs) -> Result<IntentReconcileSummary, sqlx::Error> {
        let superseded = self.cancel_superseded(now).await?;
        let recovered = self.cancel_recovered(now).await?;
        if superseded + recovered > 0 {
            info!(superseded, recovered, "Cancelled stale intents");
        }
        Ok(IntentReconcileSummary {
            superseded,
            recovered,
        })
    }

    async fn cancel_superseded(&self, now: TimeMs) -> Result<usize, sqlx::Error> {
        let mut cancelled = 0;
        for position_id in self.repo.positions_with_multiple_active_intents().await? {
            let active = self.repo.active_intents_for_position(&position_id).await?;
            let Some(top) = active.iter().max_by_key(|i| i.reason_code.severity()) else {
                continue;
            };
            let top_reason = top.reason_code;
            for intent in active
                .iter()
                .filter(|i| i.status.is_unsubmitted())
                .filter(|i| i.reason_code.severity() < top_reason.severity())
            {
                let message = format!("superseded by {}", top_reason);
                if self.cancel(intent, &message, now).await? {
                    info!(
                        intent_id = %intent.intent_id,
                        position_id = %position_id,
                        reason = %intent.reason_code,
                        superseded_by = %top_reason,
                        "Cancelled superseded intent"
                    );
                    cancelled += 1;
                }
            }
        }
        Ok(cancelled)
    }

    async fn cancel_recovered(&self, now: TimeMs) -> Result<usize, sqlx::Error> {
        let mut cancelled = 0;
        for status in UNSUBMITTED {
            for intent in self.repo.load_intents_by_status(status).await? {
                let Some(threshold) = recovery_threshold(intent.reason_code) else {
                    continue;
                };
                let Some(position) = self.repo.get_position(&intent.position_id).await? else {
                    continue;
                };
                let quote = match self.prices.get_best_price(&position.symbol).await {
                    Ok(q) if q.is_fresh(now, self.price_freshness_ms) => q,
                    Ok(_) => {
                        debug!(symbol = %position.symbol, "Stale price, skipping recovery check");
                        continue;
                    }
                    Err(e) => {
                        warn!(symbol = %position.symbol, error = %e, "Price unavailable for recovery check");
                        continue;
                    }
                };
                let Some(pnl) = pnl_pct(position.avg_price, quote.exit_price()) else {
                    continue;
                };
                if pnl <= threshold {
                    continue;
                }
                if self.cancel(&intent, "loss recovered", now).await? {
                    info!(
                        intent_id = %intent.intent_id,
                        position_id = %intent.position_id,
                        reason = %intent.reason_code,
                        pnl_pct = %pnl,
                        "Cancelled stop intent after recovery"
                    );
                    cancelled += 1;
                }
            }
        }
        Ok(cancelled)
    }

    async fn cancel(&self, intent: &OrderIntent, message: &str, now: TimeMs) -> Result<bool, sqlx::Error> {
        self.repo
            .transition_intent_status(
                &intent.intent_id,
                &UNSUBMITTED,
                IntentStatus::Cancelled,
                Some(message),
                now,
            )
            .await
    }
}
