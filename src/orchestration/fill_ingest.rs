//! Shared path for turning broker fills into local fills, order quantities
//! and order status. Used by the fill poller, the order reconciler and
//! bootstrap.

use super::fsm_handler::FsmHandler;
use crate::broker::{BrokerAdapter, BrokerError, BrokerFill, UnfilledOrder};
use crate::db::Repository;
use crate::domain::{IntentStatus, Order, OrderStatus, TimeMs};
use crate::engine::derive_order_status;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct FillIngestor {
    repo: Arc<Repository>,
    broker: Arc<dyn BrokerAdapter>,
    fsm: FsmHandler,
    account_id: String,
}

impl FillIngestor {
    pub fn new(repo: Arc<Repository>, broker: Arc<dyn BrokerAdapter>, account_id: String) -> Self {
        Self {
            fsm: FsmHandler::new(repo.clone()),
            repo,
            broker,
            account_id,
        }
    }

    /// Ingest one broker fill. Returns true if it was new.
    ///
    /// `unfilled` is the broker's unfilled list when the caller already has
    /// it; otherwise it is fetched only if the order is unknown locally.
    pub async fn ingest(
        &self,
        fill: &BrokerFill,
        unfilled: Option<&[UnfilledOrder]>,
        now: TimeMs,
    ) -> Result<bool, ReconcileError> {
        self.ensure_order_exists(&fill.order_id, unfilled, now).await?;

        let inserted = self.repo.record_fill(&fill.to_fill()).await?;
        if inserted {
            self.settle(&fill.order_id, now).await?;
        }
        Ok(inserted)
    }

    /// Make sure an order row exists for `order_id`, materialising it from the
    /// broker's unfilled list, or as a zero-quantity placeholder when the
    /// broker no longer lists it.
    pub async fn ensure_order_exists(
        &self,
        order_id: &str,
        unfilled: Option<&[UnfilledOrder]>,
        now: TimeMs,
    ) -> Result<Order, ReconcileError> {
        if let Some(order) = self.repo.get_order(order_id).await? {
            return Ok(order);
        }

        let fetched;
        let listed = match unfilled {
            Some(list) => list,
            None => {
                fetched = self.broker.get_unfilled_orders(&self.account_id).await?;
                fetched.as_slice()
            }
        };

        let order = match listed.iter().find(|u| u.order_id == order_id) {
            Some(u) => {
                info!(order_id = %order_id, "Materialising order from broker unfilled list");
                self.order_from_unfilled(u, now)
            }
            None => {
                warn!(order_id = %order_id, "Order unknown to broker listing, creating placeholder");
                Order::placeholder(order_id, self.account_id.clone(), now)
            }
        };
        self.repo.upsert_order(&order).await?;
        Ok(order)
    }

    pub fn order_from_unfilled(&self, u: &UnfilledOrder, now: TimeMs) -> Order {
        let filled = u.filled_qty.max(0);
        let qty = u.qty.max(filled);
        Order {
            order_id: u.order_id.clone(),
            intent_id: None,
            account_id: self.account_id.clone(),
            symbol: u.symbol.clone(),
            side: u.side,
            qty,
            open_qty: u.open_qty.max(0),
            filled_qty: filled,
            status: derive_order_status(qty, u.open_qty, filled, Some(&u.status)),
            broker_status: Some(u.status.clone()),
            submitted_ts: now,
            updated_ts: now,
            raw: serde_json::to_value(u).ok(),
        }
    }

    /// Re-derive an order's status from its stored quantities and apply the
    /// consequences of a terminal status to its intent.
    pub async fn settle(&self, order_id: &str, now: TimeMs) -> Result<Option<OrderStatus>, ReconcileError> {
        let Some(order) = self.repo.get_order(order_id).await? else {
            return Ok(None);
        };
        let status = derive_order_status(
            order.qty,
            order.open_qty,
            order.filled_qty,
            order.broker_status.as_deref(),
        );
        if status != order.status {
            self.repo
                .update_order_progress(order_id, order.open_qty, status, None, now)
                .await?;
            info!(
                order_id = %order_id,
                from = %order.status,
                to = %status,
                filled_qty = order.filled_qty,
                "Order status changed"
            );
        }
        self.apply_terminal(&order, status, now).await?;
        Ok(Some(status))
    }

    /// Terminal order statuses close out the intent: FILLED feeds the exit
    /// state machine, cancellations and rejections release the intent so it no
    /// longer blocks less severe triggers.
    pub(crate) async fn apply_terminal(
        &self,
        order: &Order,
        status: OrderStatus,
        now: TimeMs,
    ) -> Result<(), ReconcileError> {
        let Some(intent_id) = order.intent_id.as_deref() else {
            return Ok(());
        };
        match status {
            OrderStatus::Filled => {
                let mut filled = order.clone();
                filled.status = status;
                self.fsm.on_order_filled(&filled, now).await?;
            }
            OrderStatus::Cancelled | OrderStatus::CancelledPartial => {
                self.repo
                    .transition_intent_status(
                        intent_id,
                        &[IntentStatus::Submitted],
                        IntentStatus::Cancelled,
                        Some("order cancelled at broker"),
                        now,
                    )
                    .await?;
            }
            OrderStatus::Rejected | OrderStatus::Error => {
                self.repo
                    .transition_intent_status(
                        intent_id,
                        &[IntentStatus::Submitted],
                        IntentStatus::Failed,
                        Some(&format!("order {} at broker", status)),
                        now,
                    )
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }
}
