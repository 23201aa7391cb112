//! Coordinators and reconcilers that drive the engine against the database,
//! the broker and the price feed.

pub mod admin;
pub mod bootstrap;
pub mod execution_coordinator;
pub mod exit_coordinator;
pub mod fill_ingest;
pub mod fill_reconciler;
pub mod fsm_handler;
pub mod holdings_reconciler;
pub mod intent_ledger;
pub mod intent_reconciler;
pub mod market_hours;
pub mod order_reconciler;
pub mod profile_resolver;
pub mod runtime;

pub use admin::{
    AdminError, AdminService, ControlUpdate, ManualExitRequest, OverrideUpdate, PositionStateView,
    ProfileUpdate,
};
pub use bootstrap::{BootstrapError, BootstrapReport};
pub use execution_coordinator::{ExecutionCoordinator, ExecutionError, ExecutionSummary, SubmitOutcome};
pub use exit_coordinator::{EvaluationOutcome, ExitCoordinator, ExitCycleSummary, ExitError};
pub use fill_ingest::{FillIngestor, ReconcileError};
pub use fill_reconciler::{FillReconciler, FillSyncSummary};
pub use fsm_handler::FsmHandler;
pub use holdings_reconciler::{HoldingsError, HoldingsReconciler, HoldingsSyncSummary};
pub use intent_ledger::{IntentLedger, RecordOutcome};
pub use intent_reconciler::{IntentReconcileSummary, IntentReconciler};
pub use market_hours::MarketHours;
pub use order_reconciler::{OrderReconcileSummary, OrderReconciler};
pub use profile_resolver::{ProfileResolver, ProfileSource, ResolvedProfile};
pub use runtime::ExitRuntime;
