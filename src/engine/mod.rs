//! Pure computation for exit decisions: threshold scaling, trigger
//! evaluation, FSM transitions and order status derivation.

pub mod atr;
pub mod fsm;
pub mod order_status;
pub mod trigger;

pub use atr::{atr_factor, scaled_threshold};
pub use fsm::{apply_avg_price, on_exit_filled, update_hwm, AvgPriceChange, ExitFill};
pub use order_status::derive_order_status;
pub use trigger::{
    pnl_pct, Evaluation, EvaluationInput, ExitTrigger, PositionSnapshot, TriggerEvaluator,
    CONFIRM_TICKS,
};
