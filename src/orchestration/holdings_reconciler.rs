//! Holdings sync: stores the broker's holdings, keeps positions in line with
//! them and turns holdings that went to zero into exit events.

use crate::broker::{BrokerAdapter, BrokerError, BrokerHolding};
use crate::db::Repository;
use crate::domain::{
    Decimal, ExitEvent, ExitPhase, ExitSource, Holding, Position, Symbol, TimeMs, MANUAL_REASON,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Window in which a submitted or filled exit intent explains a closure.
const EXIT_ATTRIBUTION_WINDOW_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum HoldingsError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HoldingsSyncSummary {
    pub holdings: usize,
    pub positions_created: usize,
    pub positions_synced: usize,
    pub closures: usize,
}

type Snapshot = HashMap<Symbol, Holding>;

#[derive(Debug)]
pub struct HoldingsReconciler {
    repo: Arc<Repository>,
    broker: Arc<dyn BrokerAdapter>,
    account_id: String,
    /// Holdings as of the previous pass. `None` until the first pass, which
    /// diffs against the stored rows instead.
    previous: Mutex<Option<Snapshot>>,
}

impl HoldingsReconciler {
    pub fn new(repo: Arc<Repository>, broker: Arc<dyn BrokerAdapter>, account_id: String) -> Self {
        Self {
            repo,
            broker,
            account_id,
            previous: Mutex::new(None),
        }
    }

    /// One holdings pass. Holds the snapshot lock for its whole duration so
    /// overlapping passes serialise.
    pub async fn sync(&self, now: TimeMs) -> Result<HoldingsSyncSummary, HoldingsError> {
        let mut previous = self.previous.lock().await;

        let broker_holdings = self.broker.get_holdings(&self.account_id).await?;
        let prev = match previous.take() {
            Some(snapshot) => snapshot,
            None => self.stored_snapshot().await?,
        };

        let current: Vec<Holding> = broker_holdings
            .iter()
            .filter_map(|h| self.to_holding(h, now))
            .collect();
        self.repo.upsert_holdings(&current).await?;

        let present: Vec<Symbol> = current.iter().map(|h| h.symbol.clone()).collect();
        let zeroed = self
            .repo
            .zero_missing_holdings(&self.account_id, &present, now)
            .await?;
        for symbol in &zeroed {
            info!(symbol = %symbol, "Holding cleared, absent from broker response");
        }

        let mut summary = HoldingsSyncSummary {
            holdings: current.len(),
            ..Default::default()
        };

        for holding in current.iter().filter(|h| h.qty > 0) {
            match self.sync_position(holding, now).await {
                Ok(PositionSync::Created) => summary.positions_created += 1,
                Ok(PositionSync::Updated) => summary.positions_synced += 1,
                Ok(PositionSync::Unchanged) => {}
                Err(e) => {
                    error!(symbol = %holding.symbol, error = %e, "Failed to sync position with holding")
                }
            }
        }

        let mut current_map: Snapshot = current
            .into_iter()
            .map(|h| (h.symbol.clone(), h))
            .collect();

        let mut unrecorded = Vec::new();
        for (symbol, before) in prev.iter().filter(|(_, h)| h.qty > 0) {
            let after = current_map.get(symbol);
            if after.map_or(false, |h| h.qty > 0) {
                continue;
            }
            match self.record_closure(before, after, now).await {
                Ok(Some(_)) => summary.closures += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(symbol = %symbol, prev_qty = before.qty, error = %e, "Failed to record exit event");
                    unrecorded.push(before.clone());
                }
            }
        }

        // Carry failed closures forward so the next pass diffs them again.
        for before in unrecorded {
            current_map.insert(before.symbol.clone(), before);
        }
        *previous = Some(current_map);

        debug!(
            holdings = summary.holdings,
            created = summary.positions_created,
            synced = summary.positions_synced,
            closures = summary.closures,
            "Holdings synced"
        );
        Ok(summary)
    }

    async fn stored_snapshot(&self) -> Result<Snapshot, sqlx::Error> {
        let stored = self.repo.list_holdings(&self.account_id).await?;
        Ok(stored.into_iter().map(|h| (h.symbol.clone(), h)).collect())
    }

    fn to_holding(&self, h: &BrokerHolding, now: TimeMs) -> Option<Holding> {
        if h.symbol.is_empty() {
            error!(qty = h.qty, "Broker holding without symbol, skipping");
            return None;
        }
        Some(Holding {
            account_id: self.account_id.clone(),
            symbol: h.symbol.clone(),
            qty: h.qty.max(0),
            avg_price: h.avg_price,
            current_price: h.current_price,
            updated_ts: now,
            raw: serde_json::to_value(h).ok(),
        })
    }

    async fn sync_position(&self, holding: &Holding, now: TimeMs) -> Result<PositionSync, sqlx::Error> {
        match self
            .repo
            .find_active_position_by_symbol(&self.account_id, &holding.symbol)
            .await?
        {
            Some(position) => {
                let changed = self
                    .repo
                    .sync_position_quantity(&position.position_id, holding.qty, holding.avg_price, now)
                    .await?;
                if changed {
                    info!(
                        position_id = %position.position_id,
                        symbol = %holding.symbol,
                        qty = holding.qty,
                        avg_price = %holding.avg_price,
                        "Position synced with broker holding"
                    );
                    Ok(PositionSync::Updated)
                } else {
                    Ok(PositionSync::Unchanged)
                }
            }
            None => {
                let position = Position::open_long(
                    self.account_id.clone(),
                    holding.symbol.clone(),
                    holding.qty,
                    holding.avg_price,
                    now,
                );
                self.repo.insert_position(&position).await?;
                info!(
                    position_id = %position.position_id,
                    symbol = %holding.symbol,
                    qty = holding.qty,
                    "Auto-created position for new holding"
                );
                Ok(PositionSync::Created)
            }
        }
    }

    /// Write the exit event for a holding that went to zero, then close the
    /// position and mark its exit state EXITED.
    async fn record_closure(
        &self,
        before: &Holding,
        after: Option<&Holding>,
        now: TimeMs,
    ) -> Result<Option<ExitEvent>, sqlx::Error> {
        let Some(position) = self
            .repo
            .find_active_position_by_symbol(&self.account_id, &before.symbol)
            .await?
        else {
            warn!(symbol = %before.symbol, "No open position for cleared holding, orphan holding");
            return Ok(None);
        };

        if self
            .repo
            .get_exit_event_for_position(&position.position_id)
            .await?
            .is_some()
        {
            debug!(position_id = %position.position_id, "Exit event already recorded");
            self.finish_position(&position, now).await?;
            return Ok(None);
        }

        let since = now.saturating_sub_ms(EXIT_ATTRIBUTION_WINDOW_MS);
        let (reason_code, source, intent_id) =
            match self.repo.recent_exit_intent(&position.position_id, since).await? {
                Some(intent) => (
                    intent.reason_code.as_str().to_string(),
                    ExitSource::AutoExit,
                    Some(intent.intent_id),
                ),
                None => (MANUAL_REASON.to_string(), ExitSource::Manual, None),
            };

        let exit_avg_price = match self.repo.position_exit_vwap(&position.position_id).await? {
            Some(vwap) => vwap,
            None => {
                let last = after
                    .map(|h| h.current_price)
                    .filter(|p| p.is_positive())
                    .unwrap_or(before.current_price);
                warn!(
                    position_id = %position.position_id,
                    fallback_price = %last,
                    "No exit fills for position, using last holding price"
                );
                last
            }
        };

        let exit_qty = if before.qty > 0 { before.qty } else { position.qty };
        let entry = position.avg_price;
        let realized_pnl = (exit_avg_price - entry) * Decimal::from_i64(exit_qty);
        let realized_pnl_pct = (exit_avg_price - entry)
            .checked_div(entry)
            .unwrap_or_else(Decimal::zero);

        let event = ExitEvent {
            exit_event_id: uuid::Uuid::new_v4().to_string(),
            position_id: position.position_id.clone(),
            account_id: self.account_id.clone(),
            symbol: position.symbol.clone(),
            exit_ts: now,
            exit_qty,
            exit_avg_price,
            entry_avg_price: entry,
            reason_code,
            source,
            intent_id,
            exit_profile_id: position.exit_profile_id.clone(),
            realized_pnl,
            realized_pnl_pct,
            created_ts: now,
        };

        if !self.repo.insert_exit_event(&event).await? {
            debug!(position_id = %position.position_id, "Exit event raced with another writer");
            self.finish_position(&position, now).await?;
            return Ok(None);
        }

        info!(
            exit_event_id = %event.exit_event_id,
            position_id = %event.position_id,
            symbol = %event.symbol,
            reason = %event.reason_code,
            source = event.source.as_str(),
            realized_pnl = %event.realized_pnl,
            "Exit event created"
        );

        self.finish_position(&position, now).await?;
        Ok(Some(event))
    }

    async fn finish_position(&self, position: &Position, now: TimeMs) -> Result<(), sqlx::Error> {
        self.repo.close_position(&position.position_id, now).await?;
        let mut state = self
            .repo
            .get_or_create_exit_state(&position.position_id, position.avg_price, now)
            .await?;
        if state.phase != ExitPhase::Exited {
            state.phase = ExitPhase::Exited;
            state.stop_floor_breach_ticks = 0;
            state.trailing_breach_ticks = 0;
            state.updated_ts = now;
            self.repo.save_exit_state(&state).await?;
        }
        Ok(())
    }
}

enum PositionSync {
    Created,
    Updated,
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::db::repo::test_support::setup_test_db;
    use crate::domain::{IntentStatus, IntentType, OrderIntent, OrderType, PositionStatus, ReasonCode};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    async fn setup() -> (Arc<Repository>, Arc<MockBroker>, HoldingsReconciler, tempfile::TempDir) {
        let (repo, temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let broker = Arc::new(MockBroker::new());
        let reconciler = HoldingsReconciler::new(repo.clone(), broker.clone(), "acct-1".to_string());
        (repo, broker, reconciler, temp)
    }

    async fn active_position(repo: &Repository, symbol: &str) -> Option<Position> {
        repo.find_active_position_by_symbol("acct-1", &Symbol::new(symbol))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_holding_creates_position() {
        let (repo, broker, reconciler, _temp) = setup().await;
        broker.set_holding("005930", 50, d("70000"), d("71000"));

        let summary = reconciler.sync(TimeMs::new(1_000)).await.unwrap();
        assert_eq!(summary.positions_created, 1);

        let p = active_position(&repo, "005930").await.unwrap();
        assert_eq!((p.qty, p.original_qty, p.version), (50, 50, 1));
        assert_eq!(p.status, PositionStatus::Open);
    }

    #[tokio::test]
    async fn test_changed_holding_syncs_position() {
        let (repo, broker, reconciler, _temp) = setup().await;
        broker.set_holding("005930", 50, d("70000"), d("71000"));
        reconciler.sync(TimeMs::new(1_000)).await.unwrap();

        broker.set_holding("005930", 30, d("70000"), d("71000"));
        let summary = reconciler.sync(TimeMs::new(2_000)).await.unwrap();
        assert_eq!(summary.positions_synced, 1);

        let p = active_position(&repo, "005930").await.unwrap();
        assert_eq!((p.qty, p.original_qty, p.version), (30, 50, 2));
    }

    #[tokio::test]
    async fn test_closure_attributed_to_recent_exit_intent() {
        let (repo, broker, reconciler, _temp) = setup().await;
        broker.set_holding("005930", 50, d("70000"), d("71000"));
        reconciler.sync(TimeMs::new(1_000)).await.unwrap();
        let p = active_position(&repo, "005930").await.unwrap();

        let intent = OrderIntent::new(
            p.position_id.clone(),
            "acct-1",
            p.symbol.clone(),
            IntentType::ExitFull,
            50,
            OrderType::Lmt,
            Some(d("77000")),
            ReasonCode::Tp2,
            format!("{}:OPEN:TP2", p.position_id),
            IntentStatus::Submitted,
            TimeMs::new(1_500),
        );
        repo.insert_intent(&intent).await.unwrap();

        broker.set_holding("005930", 0, d("70000"), d("71000"));
        let summary = reconciler.sync(TimeMs::new(2_000)).await.unwrap();
        assert_eq!(summary.closures, 1);

        let event = repo
            .get_exit_event_for_position(&p.position_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.source, ExitSource::AutoExit);
        assert_eq!(event.reason_code, "TP2");
        assert_eq!(event.intent_id.as_deref(), Some(intent.intent_id.as_str()));
        assert_eq!(event.exit_qty, 50);
        assert_eq!(event.realized_pnl, d("50000"));

        let closed = repo.get_position(&p.position_id).await.unwrap().unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        let state = repo.get_exit_state(&p.position_id).await.unwrap().unwrap();
        assert_eq!(state.phase, ExitPhase::Exited);
    }

    #[tokio::test]
    async fn test_disappeared_holding_without_intent_is_manual() {
        let (repo, broker, reconciler, _temp) = setup().await;
        broker.set_holding("000660", 10, d("100000"), d("95000"));
        reconciler.sync(TimeMs::new(1_000)).await.unwrap();
        let p = active_position(&repo, "000660").await.unwrap();

        broker.remove_holding("000660");
        let summary = reconciler.sync(TimeMs::new(2_000)).await.unwrap();
        assert_eq!(summary.closures, 1);

        let event = repo
            .get_exit_event_for_position(&p.position_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.source, ExitSource::Manual);
        assert_eq!(event.reason_code, MANUAL_REASON);
        assert_eq!(event.exit_avg_price, d("95000"));
        assert_eq!(event.realized_pnl_pct, d("-0.05"));

        let stored = repo.list_holdings("acct-1").await.unwrap();
        assert_eq!(stored[0].qty, 0);

        let again = reconciler.sync(TimeMs::new(3_000)).await.unwrap();
        assert_eq!(again.closures, 0);
    }

    #[tokio::test]
    async fn test_broker_parse_failure_leaves_position_open() {
        let (repo, broker, reconciler, _temp) = setup().await;
        broker.set_holding("005930", 50, d("70000"), d("71000"));
        reconciler.sync(TimeMs::new(1_000)).await.unwrap();
        let p = active_position(&repo, "005930").await.unwrap();

        broker.fail_holdings(Some(BrokerError::ParseError("holding #0: null currentPrice".to_string())));
        let err = reconciler.sync(TimeMs::new(2_000)).await.unwrap_err();
        assert!(matches!(err, HoldingsError::Broker(BrokerError::ParseError(_))));

        let still = repo.get_position(&p.position_id).await.unwrap().unwrap();
        assert_eq!(still.status, PositionStatus::Open);
        assert!(repo
            .get_exit_event_for_position(&p.position_id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(repo.list_holdings("acct-1").await.unwrap()[0].qty, 50);

        broker.fail_holdings(None);
        let summary = reconciler.sync(TimeMs::new(3_000)).await.unwrap();
        assert_eq!(summary.closures, 0);
        assert_eq!(summary.positions_created, 0);
        assert_eq!(
            active_position(&repo, "005930").await.unwrap().position_id,
            p.position_id
        );
    }

    #[tokio::test]
    async fn test_failed_closure_is_retried_next_pass() {
        let (repo, broker, reconciler, _temp) = setup().await;
        broker.set_holding("000660", 10, d("100000"), d("95000"));
        reconciler.sync(TimeMs::new(1_000)).await.unwrap();
        let p = active_position(&repo, "000660").await.unwrap();

        sqlx::query(
            "CREATE TRIGGER block_exit_events BEFORE INSERT ON exit_events \
             BEGIN SELECT RAISE(ABORT, 'exit events unavailable'); END",
        )
        .execute(repo.pool())
        .await
        .unwrap();

        broker.remove_holding("000660");
        let summary = reconciler.sync(TimeMs::new(2_000)).await.unwrap();
        assert_eq!(summary.closures, 0);
        assert_eq!(
            repo.get_position(&p.position_id).await.unwrap().unwrap().status,
            PositionStatus::Open
        );

        sqlx::query("DROP TRIGGER block_exit_events")
            .execute(repo.pool())
            .await
            .unwrap();

        let summary = reconciler.sync(TimeMs::new(3_000)).await.unwrap();
        assert_eq!(summary.closures, 1);
        let event = repo
            .get_exit_event_for_position(&p.position_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.exit_qty, 10);
        assert_eq!(event.source, ExitSource::Manual);
    }

    #[tokio::test]
    async fn test_fresh_reconciler_diffs_against_stored_holdings() {
        let (repo, broker, first, _temp) = setup().await;
        broker.set_holding("005930", 20, d("70000"), d("70500"));
        first.sync(TimeMs::new(1_000)).await.unwrap();
        let p = active_position(&repo, "005930").await.unwrap();

        let restarted = HoldingsReconciler::new(repo.clone(), broker.clone(), "acct-1".to_string());
        broker.remove_holding("005930");
        let summary = restarted.sync(TimeMs::new(2_000)).await.unwrap();
        assert_eq!(summary.closures, 1);
        assert!(repo
            .get_exit_event_for_position(&p.position_id)
            .await
            .unwrap()
            .is_some());
    }
}
