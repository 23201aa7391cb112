//! Exit state machine transitions.
//!
//! ```text
//! OPEN     --TP1 filled--> TP1_DONE         (stop floor = avg * (1 + beProfitPct))
//! TP1_DONE --TP2 filled--> TP2_DONE
//! TP2_DONE --TP3 filled--> TRAILING_ACTIVE  (hwm seeded)
//! any      --full exit---> EXITED
//! any      --avg +-2%----> OPEN             (new buy on top of the remainder)
//! ```

use crate::domain::{Decimal, ExitPhase, ExitState, IntentType, ReasonCode, TimeMs};
use rust_decimal::Decimal as RustDecimal;

/// Average-price move above which the position is treated as re-entered.
pub fn avg_reset_threshold() -> Decimal {
    Decimal::new(RustDecimal::new(2, 2))
}

/// Average-price move below which nothing is recorded.
pub fn avg_drift_threshold() -> Decimal {
    Decimal::new(RustDecimal::new(5, 3))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvgPriceChange {
    Unchanged,
    /// Partial fill or price correction; only `last_avg_price` moves.
    Drift,
    /// FSM reset to OPEN.
    Reset,
}

/// Reconcile the stored average price with the position's current one.
pub fn apply_avg_price(state: &mut ExitState, avg_price: Decimal, now: TimeMs) -> AvgPriceChange {
    let Some(last) = state.last_avg_price.filter(|p| p.is_positive()) else {
        state.last_avg_price = Some(avg_price);
        state.updated_ts = now;
        return AvgPriceChange::Drift;
    };
    let change = match (avg_price - last).abs().checked_div(last) {
        Some(c) => c,
        None => return AvgPriceChange::Unchanged,
    };

    if change > avg_reset_threshold() {
        state.phase = ExitPhase::Open;
        state.hwm_price = None;
        state.stop_floor_price = None;
        state.stop_floor_breach_ticks = 0;
        state.trailing_breach_ticks = 0;
        state.last_avg_price = Some(avg_price);
        state.updated_ts = now;
        AvgPriceChange::Reset
    } else if change >= avg_drift_threshold() {
        state.last_avg_price = Some(avg_price);
        state.updated_ts = now;
        AvgPriceChange::Drift
    } else {
        AvgPriceChange::Unchanged
    }
}

/// Raise the high-water mark. Only moves while trailing is active, only upward.
pub fn update_hwm(state: &mut ExitState, price: Decimal, now: TimeMs) -> bool {
    if state.phase != ExitPhase::TrailingActive {
        return false;
    }
    match state.hwm_price {
        Some(hwm) if price <= hwm => false,
        _ => {
            state.hwm_price = Some(price);
            state.updated_ts = now;
            true
        }
    }
}

/// A filled exit order as seen by the state machine.
#[derive(Debug, Clone, Copy)]
pub struct ExitFill {
    pub reason_code: ReasonCode,
    pub intent_type: IntentType,
    /// Volume-weighted price of the order's fills.
    pub fill_price: Decimal,
}

/// Apply the transition for a filled exit order. Returns whether the state changed.
pub fn on_exit_filled(
    state: &mut ExitState,
    fill: &ExitFill,
    avg_price: Decimal,
    be_profit_pct: Decimal,
    now: TimeMs,
) -> bool {
    let before = state.clone();
    let stop_floor = avg_price * (Decimal::one() + be_profit_pct);

    if fill.intent_type == IntentType::ExitFull {
        state.phase = ExitPhase::Exited;
    } else {
        match (fill.reason_code, state.phase) {
            (ReasonCode::Tp1, ExitPhase::Open) => {
                state.phase = ExitPhase::Tp1Done;
                state.stop_floor_price = Some(stop_floor);
            }
            (ReasonCode::Tp2, ExitPhase::Open | ExitPhase::Tp1Done) => {
                state.phase = ExitPhase::Tp2Done;
                state.stop_floor_price.get_or_insert(stop_floor);
                state.hwm_price = Some(fill.fill_price);
            }
            (ReasonCode::Tp3, ExitPhase::Open | ExitPhase::Tp1Done | ExitPhase::Tp2Done) => {
                state.phase = ExitPhase::TrailingActive;
                state.stop_floor_price.get_or_insert(stop_floor);
                state.hwm_price = Some(fill.fill_price);
            }
            _ => return false,
        }
    }

    state.stop_floor_breach_ticks = 0;
    state.trailing_breach_ticks = 0;
    let changed = *state != before;
    if changed {
        state.updated_ts = now;
    }
    changed
}
