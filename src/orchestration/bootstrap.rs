//! Startup recovery: bring local state back in line with the broker before
//! the periodic loops start.

use super::fill_ingest::ReconcileError;
use super::holdings_reconciler::HoldingsError;
use super::runtime::ExitRuntime;
use crate::domain::{OrderStatus, TimeMs};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("holdings sync failed: {0}")]
    Holdings(#[from] HoldingsError),
    #[error("order reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapReport {
    pub holdings: usize,
    pub positions_created: usize,
    pub closures: usize,
    pub unfilled_orders: usize,
    pub fills_inserted: usize,
    pub orders_settled: usize,
}

impl ExitRuntime {
    /// Runs holdings sync, then the broker's unfilled list, then fills since
    /// the earlier of the stored cursor and today's session open, and finally
    /// re-derives the status of every order still open locally.
    pub async fn bootstrap(&self, now: TimeMs) -> Result<BootstrapReport, BootstrapError> {
        let holdings = self.holdings.sync(now).await?;
        let unfilled = self.orders.sync_unfilled(now).await?;

        let session_open = self.market_hours.session_open(now);
        let since = match self.repo.get_fill_cursor().await? {
            Some(cursor) => cursor.last_ts.min(session_open),
            None => session_open,
        }
        .min(now);
        let fills = self.fills.sync_since(since, now).await?;
        if fills.failed > 0 {
            warn!(failed = fills.failed, "Some fills could not be ingested during bootstrap");
        }

        let mut settled = 0;
        for order in self
            .repo
            .load_orders_by_status(&[OrderStatus::Submitted, OrderStatus::Partial])
            .await?
        {
            if let Some(status) = self.ingestor.settle(&order.order_id, now).await? {
                if status != order.status {
                    settled += 1;
                }
            }
        }

        let report = BootstrapReport {
            holdings: holdings.holdings,
            positions_created: holdings.positions_created,
            closures: holdings.closures,
            unfilled_orders: unfilled,
            fills_inserted: fills.inserted,
            orders_settled: settled,
        };
        info!(
            holdings = report.holdings,
            positions_created = report.positions_created,
            closures = report.closures,
            unfilled_orders = report.unfilled_orders,
            fills_inserted = report.fills_inserted,
            orders_settled = report.orders_settled,
            since = since.as_i64(),
            "Bootstrap complete"
        );
        Ok(report)
    }
}
