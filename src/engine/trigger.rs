//! Exit trigger evaluation.
//!
//! A pure function of the position snapshot, FSM state, current price,
//! resolved profile and control mode. The only state it carries forward is
//! the pair of confirm-tick counters, returned in [`Evaluation`] for the
//! caller to persist.

use crate::domain::{
    ControlMode, Decimal, ExitPhase, ExitProfileConfig, ExitState, IntentType, OrderType,
    ReasonCode, Symbol, TimeMs, TriggerConfig,
};
use crate::engine::atr::{atr_factor, scaled_threshold};

/// Consecutive breaching ticks required before stop-floor or trailing fire.
pub const CONFIRM_TICKS: i32 = 2;

/// Position fields frozen at the start of an evaluation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    pub position_id: String,
    pub symbol: Symbol,
    pub qty: i64,
    pub original_qty: i64,
    pub avg_price: Decimal,
    pub entry_ts: TimeMs,
    pub version: i64,
    pub phase: ExitPhase,
}

#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub snapshot: &'a PositionSnapshot,
    pub state: &'a ExitState,
    /// Exit-side price (bid when available).
    pub price: Decimal,
    pub profile: &'a ExitProfileConfig,
    pub mode: ControlMode,
    pub now: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitTrigger {
    pub reason_code: ReasonCode,
    pub qty: i64,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    /// Price the decision was made at.
    pub price: Decimal,
    pub pnl_pct: Decimal,
}

impl ExitTrigger {
    /// Full exit when the trigger covers the whole of `position_qty`.
    pub fn intent_type(&self, position_qty: i64) -> IntentType {
        if self.qty >= position_qty {
            IntentType::ExitFull
        } else {
            IntentType::ExitPartial
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub trigger: Option<ExitTrigger>,
    pub stop_floor_breach_ticks: i32,
    pub trailing_breach_ticks: i32,
}

/// Decides at most one exit per tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    pub fn new() -> Self {
        TriggerEvaluator
    }

    /// Run the priority chain. First match wins:
    /// SL2, stop floor, SL1, (control gate), TP3, TP2, TP1, trailing, time.
    pub fn evaluate(&self, input: &EvaluationInput<'_>) -> Evaluation {
        let snap = input.snapshot;
        let state = input.state;
        let mut eval = Evaluation {
            trigger: None,
            stop_floor_breach_ticks: state.stop_floor_breach_ticks,
            trailing_breach_ticks: state.trailing_breach_ticks,
        };

        if snap.qty <= 0 || state.phase == ExitPhase::Exited {
            return eval;
        }
        let Some(pnl_pct) = pnl_pct(snap.avg_price, input.price) else {
            return eval;
        };

        match input.mode {
            ControlMode::PauseAll => return eval,
            ControlMode::EmergencyFlatten => {
                eval.trigger = Some(full_exit(ReasonCode::Flatten, snap, input.price, pnl_pct));
                return eval;
            }
            ControlMode::Running | ControlMode::PauseProfit => {}
        }

        let profile = input.profile;
        let factor = atr_factor(state.cached_atr, &profile.atr);

        if pnl_pct <= scaled_threshold(&profile.sl2, factor) {
            eval.trigger = Some(full_exit(ReasonCode::Sl2, snap, input.price, pnl_pct));
            return eval;
        }

        match (state.phase.has_stop_floor(), state.stop_floor_price) {
            (true, Some(floor)) => {
                if input.price <= floor {
                    eval.stop_floor_breach_ticks += 1;
                    if eval.stop_floor_breach_ticks >= CONFIRM_TICKS {
                        eval.stop_floor_breach_ticks = 0;
                        eval.trigger =
                            Some(full_exit(ReasonCode::StopFloor, snap, input.price, pnl_pct));
                        return eval;
                    }
                } else {
                    eval.stop_floor_breach_ticks = 0;
                }
            }
            _ => eval.stop_floor_breach_ticks = 0,
        }

        if profile.sl1.qty_pct.is_positive() && pnl_pct <= scaled_threshold(&profile.sl1, factor)
        {
            let qty = fraction_of(profile.sl1.qty_pct, snap.qty).min(snap.qty);
            eval.trigger = Some(ExitTrigger {
                reason_code: ReasonCode::Sl1,
                qty,
                order_type: OrderType::Mkt,
                limit_price: None,
                price: input.price,
                pnl_pct,
            });
            return eval;
        }

        if input.mode == ControlMode::PauseProfit {
            return eval;
        }

        let tiers = [
            (ReasonCode::Tp3, &profile.tp3),
            (ReasonCode::Tp2, &profile.tp2),
            (ReasonCode::Tp1, &profile.tp1),
        ];
        for (reason, tier) in tiers {
            if !tier_eligible(reason, state.phase) || !tier.qty_pct.is_positive() {
                continue;
            }
            if pnl_pct >= scaled_threshold(tier, factor) {
                eval.trigger = Some(take_profit(reason, tier, snap, input.price, pnl_pct));
                return eval;
            }
        }

        if let Some(trigger) = self.evaluate_trailing(input, pnl_pct, &mut eval) {
            eval.trigger = Some(trigger);
            return eval;
        }

        if time_stop_hit(input) {
            eval.trigger = Some(full_exit(ReasonCode::Time, snap, input.price, pnl_pct));
        }
        eval
    }

    fn evaluate_trailing(
        &self,
        input: &EvaluationInput<'_>,
        pnl_pct: Decimal,
        eval: &mut Evaluation,
    ) -> Option<ExitTrigger> {
        let snap = input.snapshot;
        let state = input.state;
        let armed = matches!(state.phase, ExitPhase::Tp2Done | ExitPhase::TrailingActive);
        let Some(hwm) = state.hwm_price.filter(|_| armed) else {
            eval.trailing_breach_ticks = 0;
            return None;
        };

        let trailing = &input.profile.trailing;
        let mut trail_pct = trailing.pct_trail;
        if let Some(atr) = state.cached_atr {
            if trailing.atr_k.is_positive() {
                trail_pct = trail_pct.max(trailing.atr_k * atr);
            }
        }
        let stop_price = hwm * (Decimal::one() - trail_pct);

        if input.price > stop_price {
            eval.trailing_breach_ticks = 0;
            return None;
        }
        eval.trailing_breach_ticks += 1;
        if eval.trailing_breach_ticks < CONFIRM_TICKS {
            return None;
        }
        eval.trailing_breach_ticks = 0;

        if state.phase == ExitPhase::Tp2Done {
            let qty = fraction_of(input.profile.tp2.qty_pct, snap.original_qty).min(snap.qty);
            Some(ExitTrigger {
                reason_code: ReasonCode::TrailPartial,
                qty,
                order_type: OrderType::Mkt,
                limit_price: None,
                price: input.price,
                pnl_pct,
            })
        } else {
            Some(full_exit(ReasonCode::Trail, snap, input.price, pnl_pct))
        }
    }
}

/// `(price - avg) / avg`, or `None` for a non-positive average.
pub fn pnl_pct(avg_price: Decimal, price: Decimal) -> Option<Decimal> {
    if !avg_price.is_positive() {
        return None;
    }
    (price - avg_price).checked_div(avg_price)
}

/// A target tier fires only while the phase has not moved past it.
fn tier_eligible(reason: ReasonCode, phase: ExitPhase) -> bool {
    match reason {
        ReasonCode::Tp1 => phase == ExitPhase::Open,
        ReasonCode::Tp2 => matches!(phase, ExitPhase::Open | ExitPhase::Tp1Done),
        ReasonCode::Tp3 => matches!(
            phase,
            ExitPhase::Open | ExitPhase::Tp1Done | ExitPhase::Tp2Done
        ),
        _ => false,
    }
}

fn time_stop_hit(input: &EvaluationInput<'_>) -> bool {
    let cfg = &input.profile.time_stop;
    let snap = input.snapshot;
    let days = input.now.whole_days_since(snap.entry_ts);

    if cfg.max_hold_days > 0 && days >= cfg.max_hold_days {
        return true;
    }
    if cfg.no_momentum_days > 0 && days >= cfg.no_momentum_days {
        let peak = match input.state.hwm_price {
            Some(hwm) => hwm.max(input.price),
            None => input.price,
        };
        if let Some(max_profit) = pnl_pct(snap.avg_price, peak) {
            return max_profit < cfg.no_momentum_profit;
        }
    }
    false
}

/// `floor(pct * qty)`, at least one share.
fn fraction_of(pct: Decimal, qty: i64) -> i64 {
    (pct * Decimal::from_i64(qty))
        .floor_to_i64()
        .unwrap_or(0)
        .max(1)
}

fn full_exit(
    reason: ReasonCode,
    snap: &PositionSnapshot,
    price: Decimal,
    pnl_pct: Decimal,
) -> ExitTrigger {
    ExitTrigger {
        reason_code: reason,
        qty: snap.qty,
        order_type: OrderType::Mkt,
        limit_price: None,
        price,
        pnl_pct,
    }
}

fn take_profit(
    reason: ReasonCode,
    tier: &TriggerConfig,
    snap: &PositionSnapshot,
    price: Decimal,
    pnl_pct: Decimal,
) -> ExitTrigger {
    ExitTrigger {
        reason_code: reason,
        qty: fraction_of(tier.qty_pct, snap.original_qty).min(snap.qty),
        order_type: OrderType::Lmt,
        limit_price: Some(price),
        price,
        pnl_pct,
    }
}
