//! Cross-checks locally open orders against the broker's unfilled list.

use super::fill_ingest::{FillIngestor, ReconcileError};
use crate::broker::{BrokerAdapter, UnfilledOrder};
use crate::db::Repository;
use crate::domain::{Order, OrderStatus, TimeMs};
use crate::engine::derive_order_status;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OrderReconcileSummary {
    pub checked: usize,
    pub still_open: usize,
    pub resolved_by_fills: usize,
    pub marked_unknown: usize,
    pub materialised: usize,
}

#[derive(Debug, Clone)]
pub struct OrderReconciler {
    repo: Arc<Repository>,
    broker: Arc<dyn BrokerAdapter>,
    ingestor: FillIngestor,
    account_id: String,
}

impl OrderReconciler {
    pub fn new(
        repo: Arc<Repository>,
        broker: Arc<dyn BrokerAdapter>,
        ingestor: FillIngestor,
        account_id: String,
    ) -> Self {
        Self {
            repo,
            broker,
            ingestor,
            account_id,
        }
    }

    /// Store any order the broker lists as unfilled that is unknown locally.
    pub async fn sync_unfilled(&self, now: TimeMs) -> Result<usize, ReconcileError> {
        let unfilled = self.broker.get_unfilled_orders(&self.account_id).await?;
        let mut created = 0;
        for u in &unfilled {
            if self.repo.get_order(&u.order_id).await?.is_none() {
                let order = self.ingestor.order_from_unfilled(u, now);
                self.repo.upsert_order(&order).await?;
                created += 1;
            }
        }
        if created > 0 {
            info!(count = created, "Materialised unfilled orders from broker");
        }
        Ok(created)
    }

    /// One reconciliation pass over SUBMITTED and PARTIAL orders.
    ///
    /// Per-order failures are logged and skipped; only a failure to fetch the
    /// unfilled list or the local order set fails the pass.
    pub async fn reconcile(&self, now: TimeMs) -> Result<OrderReconcileSummary, ReconcileError> {
        let local = self
            .repo
            .load_orders_by_status(&[OrderStatus::Submitted, OrderStatus::Partial])
            .await?;
        let unfilled = self.broker.get_unfilled_orders(&self.account_id).await?;
        let by_id: HashMap<&str, &UnfilledOrder> =
            unfilled.iter().map(|u| (u.order_id.as_str(), u)).collect();

        let mut summary = OrderReconcileSummary {
            checked: local.len(),
            ..Default::default()
        };

        for order in &local {
            let result = match by_id.get(order.order_id.as_str()) {
                Some(u) => self.sync_open(order, u, now).await.map(|_| {
                    summary.still_open += 1;
                }),
                None => self.resolve_missing(order, &unfilled, now).await.map(|status| {
                    if status == OrderStatus::Unknown {
                        summary.marked_unknown += 1;
                    } else {
                        summary.resolved_by_fills += 1;
                    }
                }),
            };
            if let Err(e) = result {
                error!(order_id = %order.order_id, error = %e, "Order reconciliation failed");
            }
        }

        debug!(
            checked = summary.checked,
            still_open = summary.still_open,
            resolved = summary.resolved_by_fills,
            unknown = summary.marked_unknown,
            "Order reconciliation pass"
        );
        Ok(summary)
    }

    /// Take the broker's quantities as-is and re-derive.
    async fn sync_open(&self, order: &Order, u: &UnfilledOrder, now: TimeMs) -> Result<(), ReconcileError> {
        let filled = u.filled_qty.max(0);
        let qty = u.qty.max(filled);
        let status = derive_order_status(qty, u.open_qty, filled, Some(&u.status));

        let mut updated = order.clone();
        updated.qty = qty;
        updated.open_qty = u.open_qty.max(0);
        updated.filled_qty = filled;
        updated.status = status;
        updated.broker_status = Some(u.status.clone());
        updated.updated_ts = now;
        self.repo.upsert_order(&updated).await?;

        if status != order.status {
            info!(order_id = %order.order_id, from = %order.status, to = %status, "Order status synced from broker");
        }
        self.ingestor.apply_terminal(&updated, status, now).await
    }

    /// The order left the unfilled list. Its own fills decide the outcome;
    /// without any, the order is UNKNOWN.
    async fn resolve_missing(
        &self,
        order: &Order,
        unfilled: &[UnfilledOrder],
        now: TimeMs,
    ) -> Result<OrderStatus, ReconcileError> {
        let fills = self.broker.get_fills_for_order(&order.order_id).await?;
        if fills.is_empty() && order.filled_qty == 0 {
            warn!(order_id = %order.order_id, "Order left unfilled list without fills, marking UNKNOWN");
            self.repo
                .update_order_progress(&order.order_id, 0, OrderStatus::Unknown, None, now)
                .await?;
            return Ok(OrderStatus::Unknown);
        }

        for fill in &fills {
            self.ingestor.ingest(fill, Some(unfilled), now).await?;
        }

        let Some(current) = self.repo.get_order(&order.order_id).await? else {
            return Ok(OrderStatus::Unknown);
        };
        let status = derive_order_status(
            current.qty,
            0,
            current.filled_qty,
            current.broker_status.as_deref(),
        );
        self.repo
            .update_order_progress(&order.order_id, 0, status, None, now)
            .await?;
        self.ingestor.apply_terminal(&current, status, now).await?;
        Ok(status)
    }
}
