//! Exit evaluation loop body: snapshot, price check, trigger evaluation,
//! version re-check and intent creation, with bounded retry on conflicts.

use super::intent_ledger::{IntentLedger, RecordOutcome};
use super::profile_resolver::ProfileResolver;
use crate::db::Repository;
use crate::domain::{
    ControlMode, ExitSignal, OrderIntent, Position, PositionStatus, ReasonCode, Symbol, TimeMs,
};
use crate::engine::{
    apply_avg_price, update_hwm, AvgPriceChange, EvaluationInput, ExitTrigger, PositionSnapshot,
    TriggerEvaluator,
};
use crate::pricefeed::PriceFeed;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Attempts per position before a version conflict is reported.
pub const MAX_EVALUATION_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ExitError {
    #[error("stale price for {0}")]
    StalePrice(Symbol),
    #[error("no price for {symbol}: {message}")]
    PriceUnavailable { symbol: Symbol, message: String },
    #[error("no available quantity")]
    NoAvailableQty,
    #[error("position changed during evaluation")]
    PositionChanged,
    #[error("position changed on each of {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("data integrity: {0}")]
    DataIntegrity(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl ExitError {
    /// Business conditions that drive skip or retry logic rather than alerts.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ExitError::StalePrice(_)
                | ExitError::PriceUnavailable { .. }
                | ExitError::NoAvailableQty
                | ExitError::PositionChanged
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    NoTrigger,
    Created(OrderIntent),
    AlreadyRecorded,
    Suppressed { by: ReasonCode },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExitCycleSummary {
    pub evaluated: usize,
    pub intents_created: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct ExitCoordinator {
    repo: Arc<Repository>,
    prices: Arc<dyn PriceFeed>,
    resolver: ProfileResolver,
    ledger: IntentLedger,
    evaluator: TriggerEvaluator,
    price_freshness_ms: i64,
}

impl ExitCoordinator {
    pub fn new(
        repo: Arc<Repository>,
        prices: Arc<dyn PriceFeed>,
        ledger: IntentLedger,
        price_freshness_ms: i64,
    ) -> Self {
        Self {
            resolver: ProfileResolver::new(repo.clone()),
            repo,
            prices,
            ledger,
            evaluator: TriggerEvaluator::new(),
            price_freshness_ms,
        }
    }

    /// Evaluate every evaluable position once.
    ///
    /// Failures are scoped to the position; only loading the control row or
    /// the position list fails the cycle.
    pub async fn run_cycle(&self, now: TimeMs) -> Result<ExitCycleSummary, sqlx::Error> {
        let control = self.repo.get_control().await?;
        let mut summary = ExitCycleSummary::default();
        if control.mode == ControlMode::PauseAll {
            debug!("Exit evaluation paused");
            return Ok(summary);
        }

        let positions = self.repo.load_evaluable_positions().await?;
        for position in positions {
            summary.evaluated += 1;
            let position_id = position.position_id.clone();
            let symbol = position.symbol.clone();
            match self.evaluate_position(position, control.mode, now).await {
                Ok(EvaluationOutcome::Created(_)) => summary.intents_created += 1,
                Ok(_) => {}
                Err(e) if e.is_expected() => {
                    summary.skipped += 1;
                    debug!(position_id = %position_id, symbol = %symbol, reason = %e, "Evaluation skipped");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(position_id = %position_id, symbol = %symbol, error = %e, "Position evaluation failed");
                }
            }
        }
        Ok(summary)
    }

    /// Evaluate one position, re-snapshotting on version conflicts.
    pub async fn evaluate_position(
        &self,
        position: Position,
        mode: ControlMode,
        now: TimeMs,
    ) -> Result<EvaluationOutcome, ExitError> {
        let mut position = position;
        for attempt in 1..=MAX_EVALUATION_ATTEMPTS {
            match self.evaluate_once(&position, mode, now).await {
                Err(ExitError::PositionChanged) => {
                    debug!(position_id = %position.position_id, attempt, "Position changed, re-evaluating");
                    match self.repo.get_position(&position.position_id).await? {
                        Some(fresh) if fresh.is_auto_evaluable() => position = fresh,
                        _ => return Ok(EvaluationOutcome::NoTrigger),
                    }
                }
                other => return other,
            }
        }
        warn!(position_id = %position.position_id, "Evaluation retries exhausted");
        Err(ExitError::RetriesExhausted {
            attempts: MAX_EVALUATION_ATTEMPTS,
        })
    }

    async fn evaluate_once(
        &self,
        position: &Position,
        mode: ControlMode,
        now: TimeMs,
    ) -> Result<EvaluationOutcome, ExitError> {
        if position.symbol.is_empty() {
            return Err(ExitError::DataIntegrity(format!(
                "position {} has no symbol",
                position.position_id
            )));
        }

        let mut state = self
            .repo
            .get_or_create_exit_state(&position.position_id, position.avg_price, now)
            .await?;
        let avg_change = apply_avg_price(&mut state, position.avg_price, now);
        if avg_change == AvgPriceChange::Reset {
            info!(
                position_id = %position.position_id,
                symbol = %position.symbol,
                avg_price = %position.avg_price,
                "Average price moved, exit state reset to OPEN"
            );
        }

        let quote = self
            .prices
            .get_best_price(&position.symbol)
            .await
            .map_err(|e| ExitError::PriceUnavailable {
                symbol: position.symbol.clone(),
                message: e.to_string(),
            })?;
        if !quote.is_fresh(now, self.price_freshness_ms) {
            if avg_change != AvgPriceChange::Unchanged {
                self.repo.save_exit_state(&state).await?;
            }
            return Err(ExitError::StalePrice(position.symbol.clone()));
        }
        let price = quote.exit_price();

        let hwm_moved = update_hwm(&mut state, price, now);
        if avg_change != AvgPriceChange::Unchanged || hwm_moved {
            self.repo.save_exit_state(&state).await?;
        }

        let profile = self.resolver.resolve(position, now).await?;
        let snapshot = PositionSnapshot {
            position_id: position.position_id.clone(),
            symbol: position.symbol.clone(),
            qty: position.qty,
            original_qty: position.original_qty,
            avg_price: position.avg_price,
            entry_ts: position.entry_ts,
            version: position.version,
            phase: state.phase,
        };
        let evaluation = self.evaluator.evaluate(&EvaluationInput {
            snapshot: &snapshot,
            state: &state,
            price,
            profile: &profile.config,
            mode,
            now,
        });

        let counters_moved = evaluation.stop_floor_breach_ticks != state.stop_floor_breach_ticks
            || evaluation.trailing_breach_ticks != state.trailing_breach_ticks;
        state.stop_floor_breach_ticks = evaluation.stop_floor_breach_ticks;
        state.trailing_breach_ticks = evaluation.trailing_breach_ticks;

        let Some(trigger) = evaluation.trigger else {
            if counters_moved {
                state.updated_ts = now;
                self.repo.save_exit_state(&state).await?;
            }
            return Ok(EvaluationOutcome::NoTrigger);
        };

        // Re-validate immediately before committing anything derived from the snapshot.
        let current = match self.repo.get_position(&position.position_id).await? {
            Some(p) if p.version == snapshot.version => p,
            _ => return Err(ExitError::PositionChanged),
        };

        state.updated_ts = now;
        self.repo.save_exit_state(&state).await?;

        let outcome = self
            .ledger
            .record_trigger(&current, state.phase, &trigger, now)
            .await?;
        self.record_signal(&snapshot, &trigger, matches!(outcome, RecordOutcome::Created(_)), now)
            .await;

        match outcome {
            RecordOutcome::Created(intent) => {
                if current.status == PositionStatus::Open {
                    self.flip_to_closing(&current, snapshot.version, now).await;
                }
                Ok(EvaluationOutcome::Created(intent))
            }
            RecordOutcome::AlreadyRecorded => Ok(EvaluationOutcome::AlreadyRecorded),
            RecordOutcome::Suppressed { by } => Ok(EvaluationOutcome::Suppressed { by }),
            RecordOutcome::NoAvailableQty => Err(ExitError::NoAvailableQty),
        }
    }

    async fn record_signal(
        &self,
        snapshot: &PositionSnapshot,
        trigger: &ExitTrigger,
        intent_created: bool,
        now: TimeMs,
    ) {
        let signal = ExitSignal {
            signal_id: uuid::Uuid::new_v4().to_string(),
            position_id: snapshot.position_id.clone(),
            reason_code: trigger.reason_code,
            phase: snapshot.phase,
            trigger_price: trigger.price,
            pnl_pct: trigger.pnl_pct,
            qty: trigger.qty,
            intent_created,
            evaluated_ts: now,
        };
        if let Err(e) = self.repo.insert_exit_signal(&signal).await {
            warn!(position_id = %snapshot.position_id, error = %e, "Failed to record exit signal");
        }
    }

    /// The intent is authoritative; a failed flip is only logged.
    async fn flip_to_closing(&self, position: &Position, version: i64, now: TimeMs) {
        match self
            .repo
            .transition_position_status(
                &position.position_id,
                version,
                PositionStatus::Open,
                PositionStatus::Closing,
                now,
            )
            .await
        {
            Ok(true) => info!(
                position_id = %position.position_id,
                symbol = %position.symbol,
                "Position status OPEN -> CLOSING"
            ),
            Ok(false) => debug!(position_id = %position.position_id, "Position moved on, CLOSING flip skipped"),
            Err(e) => warn!(position_id = %position.position_id, error = %e, "Failed to flip position to CLOSING"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::{seed_position, setup_test_db};
    use crate::domain::{
        Decimal, ExitControl, ExitPhase, IntentStatus, IntentType, OrderType,
    };
    use crate::pricefeed::{BestPrice, MockPriceFeed, PriceFeedError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    async fn setup() -> (Arc<Repository>, Arc<MockPriceFeed>, ExitCoordinator, tempfile::TempDir) {
        let (repo, temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let prices = Arc::new(MockPriceFeed::new());
        let coordinator = ExitCoordinator::new(
            repo.clone(),
            prices.clone(),
            IntentLedger::new(repo.clone(), false),
            10_000,
        );
        (repo, prices, coordinator, temp)
    }

    #[tokio::test]
    async fn test_sl2_creates_full_market_exit_and_flips_closing() {
        let (repo, prices, coordinator, _temp) = setup().await;
        let p = seed_position(&repo, "005930", 100, "70000").await;
        prices.set_price("005930", d("66150"));

        let outcome = coordinator
            .evaluate_position(p.clone(), ControlMode::Running, TimeMs::now())
            .await
            .unwrap();
        let EvaluationOutcome::Created(intent) = outcome else {
            panic!("expected an intent, got {:?}", outcome);
        };
        assert_eq!(intent.reason_code, ReasonCode::Sl2);
        assert_eq!(intent.qty, 100);
        assert_eq!(intent.order_type, OrderType::Mkt);
        assert_eq!(intent.intent_type, IntentType::ExitFull);
        assert_eq!(intent.status, IntentStatus::New);

        let stored = repo.get_position(&p.position_id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Closing);
        assert_eq!(stored.version, p.version + 1);
        assert_eq!(repo.count_exit_signals(&p.position_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repeat_trigger_does_not_duplicate_intent() {
        let (repo, prices, coordinator, _temp) = setup().await;
        let p = seed_position(&repo, "005930", 100, "70000").await;
        prices.set_price("005930", d("66150"));

        coordinator
            .evaluate_position(p.clone(), ControlMode::Running, TimeMs::now())
            .await
            .unwrap();
        let fresh = repo.get_position(&p.position_id).await.unwrap().unwrap();
        let second = coordinator
            .evaluate_position(fresh, ControlMode::Running, TimeMs::now())
            .await
            .unwrap();
        assert_eq!(second, EvaluationOutcome::Suppressed { by: ReasonCode::Sl2 });
        assert_eq!(
            repo.list_intents_for_position(&p.position_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_stale_price_is_expected_skip() {
        let (repo, prices, coordinator, _temp) = setup().await;
        let p = seed_position(&repo, "005930", 100, "70000").await;
        prices.set_quote(
            "005930",
            BestPrice {
                best_price: d("60000"),
                bid_price: None,
                is_stale: true,
                as_of: TimeMs::now(),
            },
        );

        let err = coordinator
            .evaluate_position(p.clone(), ControlMode::Running, TimeMs::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ExitError::StalePrice(_)));
        assert!(err.is_expected());
        assert!(repo
            .list_intents_for_position(&p.position_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_stop_floor_needs_two_breaching_ticks() {
        let (repo, prices, coordinator, _temp) = setup().await;
        let p = seed_position(&repo, "005930", 75, "70000").await;
        let now = TimeMs::now();
        let mut state = repo
            .get_or_create_exit_state(&p.position_id, p.avg_price, now)
            .await
            .unwrap();
        state.phase = ExitPhase::Tp1Done;
        state.stop_floor_price = Some(d("70420"));
        repo.save_exit_state(&state).await.unwrap();
        prices.set_price("005930", d("70300"));

        let first = coordinator
            .evaluate_position(p.clone(), ControlMode::Running, now)
            .await
            .unwrap();
        assert_eq!(first, EvaluationOutcome::NoTrigger);
        let state = repo.get_exit_state(&p.position_id).await.unwrap().unwrap();
        assert_eq!(state.stop_floor_breach_ticks, 1);

        let second = coordinator
            .evaluate_position(p.clone(), ControlMode::Running, now)
            .await
            .unwrap();
        let EvaluationOutcome::Created(intent) = second else {
            panic!("expected stop floor intent, got {:?}", second);
        };
        assert_eq!(intent.reason_code, ReasonCode::StopFloor);
        assert_eq!(intent.qty, 75);
        let state = repo.get_exit_state(&p.position_id).await.unwrap().unwrap();
        assert_eq!(state.stop_floor_breach_ticks, 0);
    }

    #[tokio::test]
    async fn test_pause_all_cycle_creates_nothing() {
        let (repo, prices, coordinator, _temp) = setup().await;
        let p = seed_position(&repo, "005930", 100, "70000").await;
        prices.set_price("005930", d("60000"));
        repo.set_control(&ExitControl {
            mode: ControlMode::PauseAll,
            reason: None,
            updated_by: None,
            updated_ts: TimeMs::new(1),
        })
        .await
        .unwrap();

        let summary = coordinator.run_cycle(TimeMs::now()).await.unwrap();
        assert_eq!(summary, ExitCycleSummary::default());
        assert!(repo
            .list_intents_for_position(&p.position_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cycle_counts_created_and_skipped() {
        let (repo, prices, coordinator, _temp) = setup().await;
        seed_position(&repo, "005930", 100, "70000").await;
        seed_position(&repo, "000660", 10, "100000").await;
        prices.set_price("005930", d("66150"));

        let summary = coordinator.run_cycle(TimeMs::now()).await.unwrap();
        assert_eq!(summary.evaluated, 2);
        assert_eq!(summary.intents_created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
    }

    /// Quotes from an inner feed, shrinking the position by one share on
    /// each of the first `bumps` reads so the version moves under the
    /// evaluation.
    #[derive(Debug)]
    struct ShrinkingFeed {
        inner: MockPriceFeed,
        repo: Arc<Repository>,
        position_id: String,
        bumps: AtomicU32,
        reads: AtomicU32,
    }

    #[async_trait]
    impl PriceFeed for ShrinkingFeed {
        async fn get_best_price(&self, symbol: &Symbol) -> Result<BestPrice, PriceFeedError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let bump = self
                .bumps
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if bump {
                let current = self.repo.get_position(&self.position_id).await.unwrap().unwrap();
                self.repo
                    .sync_position_quantity(
                        &self.position_id,
                        current.qty - 1,
                        current.avg_price,
                        TimeMs::now(),
                    )
                    .await
                    .unwrap();
            }
            self.inner.get_best_price(symbol).await
        }
    }

    async fn shrinking_setup(
        bumps: u32,
    ) -> (Arc<Repository>, Arc<ShrinkingFeed>, ExitCoordinator, Position, tempfile::TempDir) {
        let (repo, temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let p = seed_position(&repo, "005930", 100, "70000").await;
        let inner = MockPriceFeed::new();
        inner.set_price("005930", d("66150"));
        let feed = Arc::new(ShrinkingFeed {
            inner,
            repo: repo.clone(),
            position_id: p.position_id.clone(),
            bumps: AtomicU32::new(bumps),
            reads: AtomicU32::new(0),
        });
        let coordinator = ExitCoordinator::new(
            repo.clone(),
            feed.clone(),
            IntentLedger::new(repo.clone(), false),
            10_000,
        );
        (repo, feed, coordinator, p, temp)
    }

    #[tokio::test]
    async fn test_version_change_re_evaluates_fresh_snapshot() {
        let (repo, feed, coordinator, p, _temp) = shrinking_setup(1).await;

        let outcome = coordinator
            .evaluate_position(p.clone(), ControlMode::Running, TimeMs::now())
            .await
            .unwrap();
        let EvaluationOutcome::Created(intent) = outcome else {
            panic!("expected an intent on the second attempt, got {:?}", outcome);
        };
        assert_eq!(feed.reads.load(Ordering::SeqCst), 2);
        assert_eq!(intent.reason_code, ReasonCode::Sl2);
        assert_eq!(intent.qty, 99);
        assert_eq!(intent.intent_type, IntentType::ExitFull);
        assert_eq!(
            repo.list_intents_for_position(&p.position_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_version_changing_every_attempt_exhausts_retries() {
        let (repo, feed, coordinator, p, _temp) = shrinking_setup(MAX_EVALUATION_ATTEMPTS).await;

        let err = coordinator
            .evaluate_position(p.clone(), ControlMode::Running, TimeMs::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ExitError::RetriesExhausted { attempts: 3 }));
        assert!(!err.is_expected());
        assert_eq!(feed.reads.load(Ordering::SeqCst), MAX_EVALUATION_ATTEMPTS);
        assert!(repo
            .list_intents_for_position(&p.position_id)
            .await
            .unwrap()
            .is_empty());
        let stored = repo.get_position(&p.position_id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Open);
        assert_eq!(stored.qty, 97);
    }
}
