//! Wiring of the coordinators and reconcilers, and the periodic loops that
//! drive them until shutdown.

use super::admin::AdminService;
use super::execution_coordinator::ExecutionCoordinator;
use super::exit_coordinator::ExitCoordinator;
use super::fill_ingest::FillIngestor;
use super::fill_reconciler::FillReconciler;
use super::holdings_reconciler::HoldingsReconciler;
use super::intent_ledger::IntentLedger;
use super::intent_reconciler::IntentReconciler;
use super::market_hours::MarketHours;
use super::order_reconciler::OrderReconciler;
use crate::broker::BrokerAdapter;
use crate::config::{Config, LoopIntervals};
use crate::db::Repository;
use crate::domain::TimeMs;
use crate::pricefeed::PriceFeed;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Every component of the exit and execution engines, sharing one
/// repository, broker and price feed.
#[derive(Debug)]
pub struct ExitRuntime {
    pub repo: Arc<Repository>,
    pub market_hours: MarketHours,
    pub exit: ExitCoordinator,
    pub execution: ExecutionCoordinator,
    pub ingestor: FillIngestor,
    pub fills: FillReconciler,
    pub orders: OrderReconciler,
    pub holdings: HoldingsReconciler,
    pub intents: IntentReconciler,
    pub admin: AdminService,
}

impl ExitRuntime {
    pub fn new(
        config: &Config,
        repo: Arc<Repository>,
        broker: Arc<dyn BrokerAdapter>,
        prices: Arc<dyn PriceFeed>,
    ) -> Self {
        let account_id = config.account_id.clone();
        let market_hours = MarketHours::new(config.market_hours);
        let ledger = IntentLedger::new(repo.clone(), config.require_approval);
        let ingestor = FillIngestor::new(repo.clone(), broker.clone(), account_id.clone());

        Self {
            market_hours,
            exit: ExitCoordinator::new(
                repo.clone(),
                prices.clone(),
                ledger.clone(),
                config.price_freshness_ms,
            ),
            execution: ExecutionCoordinator::new(
                repo.clone(),
                broker.clone(),
                market_hours,
                account_id.clone(),
            ),
            fills: FillReconciler::new(
                repo.clone(),
                broker.clone(),
                ingestor.clone(),
                account_id.clone(),
            ),
            orders: OrderReconciler::new(
                repo.clone(),
                broker.clone(),
                ingestor.clone(),
                account_id.clone(),
            ),
            holdings: HoldingsReconciler::new(repo.clone(), broker, account_id),
            intents: IntentReconciler::new(repo.clone(), prices, config.price_freshness_ms),
            admin: AdminService::new(repo.clone(), ledger),
            ingestor,
            repo,
        }
    }

    /// Start one task per loop. Each exits when `shutdown` is cancelled.
    pub fn spawn_loops(
        self: &Arc<Self>,
        intervals: &LoopIntervals,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        vec![
            spawn_loop("exit_eval", intervals.exit_eval, shutdown.clone(), {
                let rt = Arc::clone(self);
                move || {
                    let rt = Arc::clone(&rt);
                    async move {
                        match rt.exit.run_cycle(TimeMs::now()).await {
                            Ok(s) if s.intents_created > 0 => {
                                info!(created = s.intents_created, evaluated = s.evaluated, "Exit cycle")
                            }
                            Ok(s) => debug!(evaluated = s.evaluated, skipped = s.skipped, "Exit cycle"),
                            Err(e) => error!(error = %e, "Exit evaluation cycle failed"),
                        }
                    }
                }
            }),
            spawn_loop("intent_poll", intervals.intent_poll, shutdown.clone(), {
                let rt = Arc::clone(self);
                move || {
                    let rt = Arc::clone(&rt);
                    async move {
                        if let Err(e) = rt.execution.process_new_intents(TimeMs::now()).await {
                            error!(error = %e, "Intent processing cycle failed");
                        }
                    }
                }
            }),
            spawn_loop("fill_sync", intervals.fill_sync, shutdown.clone(), {
                let rt = Arc::clone(self);
                move || {
                    let rt = Arc::clone(&rt);
                    async move {
                        let now = TimeMs::now();
                        let start = rt.market_hours.session_open(now);
                        if let Err(e) = rt.fills.sync(start, now).await {
                            warn!(error = %e, "Fill sync failed");
                        }
                    }
                }
            }),
            spawn_loop("order_reconcile", intervals.order_reconcile, shutdown.clone(), {
                let rt = Arc::clone(self);
                move || {
                    let rt = Arc::clone(&rt);
                    async move {
                        if let Err(e) = rt.orders.reconcile(TimeMs::now()).await {
                            warn!(error = %e, "Order reconciliation failed");
                        }
                    }
                }
            }),
            spawn_loop("holdings_sync", intervals.holdings_sync, shutdown.clone(), {
                let rt = Arc::clone(self);
                move || {
                    let rt = Arc::clone(&rt);
                    async move {
                        if let Err(e) = rt.holdings.sync(TimeMs::now()).await {
                            warn!(error = %e, "Holdings sync failed");
                        }
                    }
                }
            }),
            spawn_loop("intent_reconcile", intervals.intent_reconcile, shutdown.clone(), {
                let rt = Arc::clone(self);
                move || {
                    let rt = Arc::clone(&rt);
                    async move {
                        if let Err(e) = rt.intents.reconcile(TimeMs::now()).await {
                            warn!(error = %e, "Intent reconciliation failed");
                        }
                    }
                }
            }),
        ]
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(task = name, period_ms = period.as_millis() as u64, "Loop started");
        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                () = shutdown.cancelled() => {
                    info!(task = name, "Loop shutting down");
                    break;
                }
            }
        }
    })
}
