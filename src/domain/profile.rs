//! Exit profiles: named threshold sets resolved per position.

use crate::domain::{Decimal, Symbol, TimeMs};
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Profile id looked up when neither position nor symbol override applies.
pub const DEFAULT_PROFILE_ID: &str = "default";

fn dec(num: i64, scale: u32) -> Decimal {
    Decimal::new(RustDecimal::new(num, scale))
}

/// Volatility scaling bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtrConfig {
    /// Reference ATR as a fraction of price. Zero disables scaling.
    pub reference: Decimal,
    pub factor_min: Decimal,
    pub factor_max: Decimal,
}

/// One stop or target tier.
///
/// Stops carry negative percentages, targets positive ones. `min_pct` is
/// always the bound closer to zero and `max_pct` the one further away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    pub base_pct: Decimal,
    pub min_pct: Decimal,
    pub max_pct: Decimal,
    /// Fraction of quantity to exit. Zero disables the tier.
    pub qty_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailingConfig {
    pub pct_trail: Decimal,
    /// Multiplier on cached ATR widening the trail distance; zero ignores ATR.
    #[serde(default)]
    pub atr_k: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeStopConfig {
    /// Zero disables.
    pub max_hold_days: i64,
    /// Zero disables.
    pub no_momentum_days: i64,
    pub no_momentum_profit: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopFloorConfig {
    /// Profit above average price locked in once TP1 fills.
    pub be_profit_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitProfileConfig {
    pub atr: AtrConfig,
    pub sl1: TriggerConfig,
    pub sl2: TriggerConfig,
    pub tp1: TriggerConfig,
    pub tp2: TriggerConfig,
    pub tp3: TriggerConfig,
    pub trailing: TrailingConfig,
    pub time_stop: TimeStopConfig,
    pub stop_floor: StopFloorConfig,
}

impl Default for ExitProfileConfig {
    fn default() -> Self {
        ExitProfileConfig {
            atr: AtrConfig {
                reference: dec(2, 2),
                factor_min: dec(7, 1),
                factor_max: dec(16, 1),
            },
            sl1: TriggerConfig {
                base_pct: dec(-3, 2),
                min_pct: dec(-2, 2),
                max_pct: dec(-5, 2),
                qty_pct: dec(5, 1),
            },
            sl2: TriggerConfig {
                base_pct: dec(-5, 2),
                min_pct: dec(-3, 2),
                max_pct: dec(-8, 2),
                qty_pct: Decimal::one(),
            },
            tp1: TriggerConfig {
                base_pct: dec(5, 2),
                min_pct: dec(3, 2),
                max_pct: dec(8, 2),
                qty_pct: dec(3, 1),
            },
            tp2: TriggerConfig {
                base_pct: dec(10, 2),
                min_pct: dec(7, 2),
                max_pct: dec(15, 2),
                qty_pct: dec(5, 1),
            },
            tp3: TriggerConfig {
                base_pct: dec(15, 2),
                min_pct: dec(10, 2),
                max_pct: dec(22, 2),
                qty_pct: dec(2, 1),
            },
            trailing: TrailingConfig {
                pct_trail: dec(15, 3),
                atr_k: Decimal::zero(),
            },
            time_stop: TimeStopConfig {
                max_hold_days: 0,
                no_momentum_days: 0,
                no_momentum_profit: dec(2, 2),
            },
            stop_floor: StopFloorConfig {
                be_profit_pct: dec(6, 3),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileValidationError {
    #[error("{tier}: qtyPct must be within [0, 1]")]
    QtyPctOutOfRange { tier: &'static str },
    #[error("{tier}: stop thresholds must be negative")]
    StopNotNegative { tier: &'static str },
    #[error("{tier}: target thresholds must be positive")]
    TargetNotPositive { tier: &'static str },
    #[error("{tier}: minPct must lie between zero and maxPct")]
    BoundsInverted { tier: &'static str },
    #[error("atr: factorMin must be positive and not exceed factorMax")]
    AtrFactorRange,
    #[error("{0} must not be negative")]
    Negative(&'static str),
}

impl ExitProfileConfig {
    /// Reject configurations whose clamp bounds or sizes make no sense.
    ///
    /// # Errors
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ProfileValidationError> {
        for (tier, cfg) in [("sl1", &self.sl1), ("sl2", &self.sl2)] {
            check_qty_pct(tier, cfg)?;
            if !cfg.base_pct.is_negative() || !cfg.min_pct.is_negative() || !cfg.max_pct.is_negative()
            {
                return Err(ProfileValidationError::StopNotNegative { tier });
            }
            if cfg.min_pct < cfg.max_pct {
                return Err(ProfileValidationError::BoundsInverted { tier });
            }
        }
        for (tier, cfg) in [("tp1", &self.tp1), ("tp2", &self.tp2), ("tp3", &self.tp3)] {
            check_qty_pct(tier, cfg)?;
            if !cfg.base_pct.is_positive() || !cfg.min_pct.is_positive() || !cfg.max_pct.is_positive()
            {
                return Err(ProfileValidationError::TargetNotPositive { tier });
            }
            if cfg.min_pct > cfg.max_pct {
                return Err(ProfileValidationError::BoundsInverted { tier });
            }
        }
        if !self.atr.factor_min.is_positive() || self.atr.factor_min > self.atr.factor_max {
            return Err(ProfileValidationError::AtrFactorRange);
        }
        if self.atr.reference.is_negative() {
            return Err(ProfileValidationError::Negative("atr.reference"));
        }
        if self.trailing.pct_trail.is_negative() || self.trailing.atr_k.is_negative() {
            return Err(ProfileValidationError::Negative("trailing"));
        }
        if self.time_stop.max_hold_days < 0 || self.time_stop.no_momentum_days < 0 {
            return Err(ProfileValidationError::Negative("timeStop"));
        }
        if self.stop_floor.be_profit_pct.is_negative() {
            return Err(ProfileValidationError::Negative("stopFloor.beProfitPct"));
        }
        Ok(())
    }
}

fn check_qty_pct(tier: &'static str, cfg: &TriggerConfig) -> Result<(), ProfileValidationError> {
    if cfg.qty_pct.is_negative() || cfg.qty_pct > Decimal::one() {
        return Err(ProfileValidationError::QtyPctOutOfRange { tier });
    }
    Ok(())
}

/// A stored, named profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitProfile {
    pub profile_id: String,
    pub name: String,
    pub description: Option<String>,
    pub config: ExitProfileConfig,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_ts: TimeMs,
    pub updated_ts: TimeMs,
}

impl ExitProfile {
    /// Profile used when nothing is stored under [`DEFAULT_PROFILE_ID`].
    pub fn builtin_default() -> Self {
        ExitProfile {
            profile_id: DEFAULT_PROFILE_ID.to_string(),
            name: "Built-in default".to_string(),
            description: None,
            config: ExitProfileConfig::default(),
            is_active: true,
            created_by: None,
            created_ts: TimeMs::new(0),
            updated_ts: TimeMs::new(0),
        }
    }
}

/// Symbol-level profile assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolExitOverride {
    pub symbol: Symbol,
    pub profile_id: String,
    pub enabled: bool,
    /// Override applies from this instant; `None` means immediately.
    pub effective_from: Option<TimeMs>,
    pub reason: Option<String>,
    pub created_by: Option<String>,
    pub updated_ts: TimeMs,
}

impl SymbolExitOverride {
    pub fn is_effective(&self, now: TimeMs) -> bool {
        self.enabled && self.effective_from.map_or(true, |from| from <= now)
    }
}
