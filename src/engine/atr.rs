//! ATR-based threshold scaling.

use crate::domain::{AtrConfig, Decimal, TriggerConfig};

/// `clamp(atr / reference, factor_min, factor_max)`, or exactly 1 when ATR is
/// unknown or the reference is zero.
pub fn atr_factor(atr: Option<Decimal>, cfg: &AtrConfig) -> Decimal {
    let Some(atr) = atr else {
        return Decimal::one();
    };
    if !cfg.reference.is_positive() {
        return Decimal::one();
    }
    match atr.checked_div(cfg.reference) {
        Some(raw) => raw.clamp_between(cfg.factor_min, cfg.factor_max),
        None => Decimal::one(),
    }
}

/// Scale a tier's base percentage and clamp it into the tier's band.
///
/// For stops (negative base) `max_pct` is the wider, more negative bound and
/// `min_pct` the tighter one, so the clamp runs `[max_pct, min_pct]`. For
/// targets it runs `[min_pct, max_pct]`.
pub fn scaled_threshold(tier: &TriggerConfig, factor: Decimal) -> Decimal {
    let scaled = tier.base_pct * factor;
    if tier.base_pct.is_negative() {
        scaled.clamp_between(tier.max_pct, tier.min_pct)
    } else {
        scaled.clamp_between(tier.min_pct, tier.max_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn atr_cfg() -> AtrConfig {
        AtrConfig {
            reference: d("0.02"),
            factor_min: d("0.7"),
            factor_max: d("1.6"),
        }
    }

    fn sl2() -> TriggerConfig {
        TriggerConfig {
            base_pct: d("-0.05"),
            min_pct: d("-0.03"),
            max_pct: d("-0.08"),
            qty_pct: d("1"),
        }
    }

    fn tp1() -> TriggerConfig {
        TriggerConfig {
            base_pct: d("0.07"),
            min_pct: d("0.05"),
            max_pct: d("0.10"),
            qty_pct: d("0.25"),
        }
    }

    #[test]
    fn test_factor_defaults_to_one_without_atr() {
        assert_eq!(atr_factor(None, &atr_cfg()), Decimal::one());
    }

    #[test]
    fn test_factor_defaults_to_one_with_zero_reference() {
        let cfg = AtrConfig {
            reference: Decimal::zero(),
            ..atr_cfg()
        };
        assert_eq!(atr_factor(Some(d("0.05")), &cfg), Decimal::one());
    }

    #[test]
    fn test_factor_is_clamped() {
        let cfg = atr_cfg();
        assert_eq!(atr_factor(Some(d("0.001")), &cfg), d("0.7"));
        assert_eq!(atr_factor(Some(d("0.2")), &cfg), d("1.6"));
        assert_eq!(atr_factor(Some(d("0.024")), &cfg), d("1.2"));
        for atr in ["0", "0.01", "0.02", "0.03", "0.5"] {
            let f = atr_factor(Some(d(atr)), &cfg);
            assert!(f >= cfg.factor_min && f <= cfg.factor_max, "atr {}", atr);
        }
    }

    #[test]
    fn test_stop_threshold_scaled_within_band() {
        assert_eq!(scaled_threshold(&sl2(), d("0.7")), d("-0.035"));
        assert_eq!(scaled_threshold(&sl2(), Decimal::one()), d("-0.05"));
    }

    #[test]
    fn test_stop_threshold_clamped_to_tighter_bound() {
        // -0.05 * 0.4 = -0.02 is tighter than min -0.03
        assert_eq!(scaled_threshold(&sl2(), d("0.4")), d("-0.03"));
    }

    #[test]
    fn test_stop_threshold_clamped_to_wider_bound() {
        // -0.05 * 2 = -0.10 is wider than max -0.08
        assert_eq!(scaled_threshold(&sl2(), d("2")), d("-0.08"));
    }

    #[test]
    fn test_target_threshold_clamped_both_ways() {
        assert_eq!(scaled_threshold(&tp1(), d("2")), d("0.10"));
        assert_eq!(scaled_threshold(&tp1(), d("0.5")), d("0.05"));
        assert_eq!(scaled_threshold(&tp1(), Decimal::one()), d("0.07"));
    }
}
