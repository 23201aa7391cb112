//! Intent monitor: hands NEW intents to the broker during market hours.

use super::market_hours::MarketHours;
use crate::broker::{BrokerAdapter, BrokerError, OrderRequest};
use crate::db::Repository;
use crate::domain::{IntentStatus, Order, OrderIntent, OrderStatus, TimeMs};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted { order_id: String },
    /// An order already exists for the intent.
    Duplicate { order_id: String },
    /// The broker refused the order; the intent is FAILED for good.
    Failed { message: String },
    /// Accepted by the broker but the order row could not be written.
    Orphaned { order_id: String },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub submitted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct ExecutionCoordinator {
    repo: Arc<Repository>,
    broker: Arc<dyn BrokerAdapter>,
    market_hours: MarketHours,
    account_id: String,
}

impl ExecutionCoordinator {
    pub fn new(
        repo: Arc<Repository>,
        broker: Arc<dyn BrokerAdapter>,
        market_hours: MarketHours,
        account_id: String,
    ) -> Self {
        Self {
            repo,
            broker,
            market_hours,
            account_id,
        }
    }

    /// Submit every NEW intent. Outside market hours intents stay NEW.
    pub async fn process_new_intents(&self, now: TimeMs) -> Result<ExecutionSummary, sqlx::Error> {
        let mut summary = ExecutionSummary::default();
        if !self.market_hours.is_open(now) {
            return Ok(summary);
        }

        let intents = self.repo.load_intents_by_status(IntentStatus::New).await?;
        if intents.is_empty() {
            return Ok(summary);
        }
        debug!(count = intents.len(), "Processing new intents");

        for intent in &intents {
            match self.process_intent(intent, now).await {
                Ok(SubmitOutcome::Submitted { .. }) | Ok(SubmitOutcome::Orphaned { .. }) => {
                    summary.submitted += 1
                }
                Ok(SubmitOutcome::Duplicate { .. }) => summary.duplicates += 1,
                Ok(SubmitOutcome::Failed { .. }) => summary.failed += 1,
                Err(e) => {
                    error!(intent_id = %intent.intent_id, symbol = %intent.symbol, error = %e, "Intent processing failed")
                }
            }
        }
        Ok(summary)
    }

    pub async fn process_intent(
        &self,
        intent: &OrderIntent,
        now: TimeMs,
    ) -> Result<SubmitOutcome, ExecutionError> {
        if let Some(existing) = self.repo.get_order_by_intent(&intent.intent_id).await? {
            warn!(
                intent_id = %intent.intent_id,
                order_id = %existing.order_id,
                "Intent already has an order, marking DUPLICATE"
            );
            self.repo
                .transition_intent_status(
                    &intent.intent_id,
                    &[IntentStatus::New],
                    IntentStatus::Duplicate,
                    None,
                    now,
                )
                .await?;
            return Ok(SubmitOutcome::Duplicate {
                order_id: existing.order_id,
            });
        }

        let request = OrderRequest {
            account_id: self.account_id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.intent_type.side(),
            qty: intent.qty,
            order_type: intent.order_type,
            limit_price: intent.limit_price,
            client_ref: intent.intent_id.clone(),
        };

        let ack = match self.broker.submit_order(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                let message = e.to_string();
                error!(
                    intent_id = %intent.intent_id,
                    symbol = %intent.symbol,
                    error = %message,
                    "Order submission failed, intent needs manual attention"
                );
                self.repo
                    .transition_intent_status(
                        &intent.intent_id,
                        &[IntentStatus::New],
                        IntentStatus::Failed,
                        Some(&message),
                        now,
                    )
                    .await?;
                return Ok(SubmitOutcome::Failed { message });
            }
        };

        let order = Order {
            order_id: ack.order_id.clone(),
            intent_id: Some(intent.intent_id.clone()),
            account_id: self.account_id.clone(),
            symbol: Some(intent.symbol.clone()),
            side: Some(request.side),
            qty: intent.qty,
            open_qty: intent.qty,
            filled_qty: 0,
            status: OrderStatus::Submitted,
            broker_status: Some(OrderStatus::Submitted.as_str().to_string()),
            submitted_ts: ack.ts,
            updated_ts: now,
            raw: serde_json::to_value(&ack).ok(),
        };
        let orphaned = match self.repo.upsert_order(&order).await {
            Ok(()) => false,
            Err(e) => {
                error!(
                    order_id = %ack.order_id,
                    intent_id = %intent.intent_id,
                    error = %e,
                    "Failed to write order row, broker holds an untracked order"
                );
                true
            }
        };

        if !self
            .repo
            .transition_intent_status(
                &intent.intent_id,
                &[IntentStatus::New],
                IntentStatus::Submitted,
                None,
                now,
            )
            .await?
        {
            warn!(intent_id = %intent.intent_id, "Intent left NEW while its order was submitted");
        }

        info!(
            intent_id = %intent.intent_id,
            order_id = %ack.order_id,
            symbol = %intent.symbol,
            intent_type = intent.intent_type.as_str(),
            qty = intent.qty,
            "Intent submitted"
        );

        if orphaned {
            Ok(SubmitOutcome::Orphaned {
                order_id: ack.order_id,
            })
        } else {
            Ok(SubmitOutcome::Submitted {
                order_id: ack.order_id,
            })
        }
    }
}
