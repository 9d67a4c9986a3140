//! # engine::transform
//!
//! **Risk Transform** — แปลง Signal ดิบจาก Oracle เป็นระยะ SL/TP จริง
//!
//! ```text
//! RATIO_MULTIPLIER   stop = raw_stop × sl_factor        target = raw_target × tp_factor
//! FIXED_PIPS         stop = sl_pips × pip               target = tp_pips × pip
//! ATR_ADAPTIVE       stop = max(sl_floor, sl_mult×ATR)  target = max(tp_floor, tp_mult×ATR)
//!        │
//!        ├─ clamp stop   → [min_stop, max_stop]
//!        ├─ clamp target → [min_target, max_target]
//!        └─ reward/risk = target ÷ stop ∈ [min_rr, max_rr]   else PolicyViolation
//! ```
//!
//! Pure function: no state, no clock, no randomness.

use serde::Serialize;

use crate::error::EngineError;
use crate::models::{Direction, InstrumentProfile, RiskPolicy, Signal};

/// Final unsigned distances in price units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskDistances {
    pub stop:   f64,
    pub target: f64,
}

impl RiskDistances {
    pub fn reward_risk(&self) -> f64 {
        self.target / self.stop
    }

    /// Absolute (stop, target) levels for an entry in `direction`.
    /// BUY: stop below, target above. SELL mirrored.
    pub fn levels(&self, direction: Direction, entry: f64) -> (f64, f64) {
        let s = direction.sign();
        (entry - s * self.stop, entry + s * self.target)
    }
}

pub fn transform(
    policy: &RiskPolicy,
    signal: &Signal,
    profile: &InstrumentProfile,
    atr: Option<f64>,
) -> Result<RiskDistances, EngineError> {
    if !signal.direction.is_actionable() {
        return Err(EngineError::PolicyViolation(format!(
            "{}: no direction to size",
            signal.symbol
        )));
    }

    let (raw_stop, raw_target) = match *policy {
        RiskPolicy::RatioMultiplier { sl_factor, tp_factor } => (
            signal.raw_stop_distance * sl_factor,
            signal.raw_target_distance * tp_factor,
        ),
        RiskPolicy::FixedPips { sl_pips, tp_pips } => {
            (profile.pips(sl_pips), profile.pips(tp_pips))
        }
        RiskPolicy::AtrAdaptive { sl_atr_mult, tp_atr_mult, sl_floor_pips, tp_floor_pips } => {
            let atr = match atr {
                Some(v) if v.is_finite() && v >= 0.0 => v,
                Some(v) => {
                    return Err(EngineError::PolicyViolation(format!("invalid ATR value {v}")))
                }
                None => {
                    return Err(EngineError::PolicyViolation(
                        "ATR_ADAPTIVE needs a current ATR value".into(),
                    ))
                }
            };
            (
                profile.pips(sl_floor_pips).max(sl_atr_mult * atr),
                profile.pips(tp_floor_pips).max(tp_atr_mult * atr),
            )
        }
    };

    if !(raw_stop.is_finite() && raw_target.is_finite()) {
        return Err(EngineError::PolicyViolation(format!(
            "{}: non-finite distances (stop={raw_stop}, target={raw_target})",
            signal.symbol
        )));
    }

    let distances = RiskDistances {
        stop:   raw_stop.clamp(profile.min_stop(), profile.max_stop()),
        target: raw_target.clamp(profile.min_target(), profile.max_target()),
    };

    let rr = distances.reward_risk();
    if rr < profile.min_reward_risk || rr > profile.max_reward_risk {
        return Err(EngineError::PolicyViolation(format!(
            "{}: reward/risk {rr:.3} outside [{}, {}] (stop={:.5}, target={:.5})",
            signal.symbol, profile.min_reward_risk, profile.max_reward_risk,
            distances.stop, distances.target
        )));
    }

    Ok(distances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_btc(policy: RiskPolicy) -> InstrumentProfile {
        InstrumentProfile::btcusd(policy)
    }

    fn make_signal(direction: Direction, raw_stop: f64, raw_target: f64) -> Signal {
        Signal::new("BTCUSD", direction, 85.0, raw_stop, raw_target)
    }

    #[test]
    fn test_fixed_pips_ignores_raw_distances() {
        let policy = RiskPolicy::FixedPips { sl_pips: 240.0, tp_pips: 70.0 };
        let profile = make_btc(policy);
        let d = transform(&policy, &make_signal(Direction::Buy, 9999.0, 1.0), &profile, None).unwrap();
        assert_eq!(d, RiskDistances { stop: 240.0, target: 70.0 });

        let (stop, target) = d.levels(Direction::Buy, 50_000.0);
        assert_eq!(stop, 49_760.0);
        assert_eq!(target, 50_070.0);

        let (stop, target) = d.levels(Direction::Sell, 50_000.0);
        assert_eq!(stop, 50_240.0);
        assert_eq!(target, 49_930.0);
    }

    #[test]
    fn test_ratio_multiplier_scales_raw() {
        let policy = RiskPolicy::RatioMultiplier { sl_factor: 2.5, tp_factor: 0.15 };
        let profile = make_btc(policy);
        let d = transform(&policy, &make_signal(Direction::Sell, 100.0, 200.0), &profile, None).unwrap();
        assert!((d.stop - 250.0).abs() < 1e-9);
        assert!((d.target - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_uses_floor_or_multiple() {
        let policy = RiskPolicy::AtrAdaptive {
            sl_atr_mult:   1.0,
            tp_atr_mult:   1.5,
            sl_floor_pips: 40.0,
            tp_floor_pips: 65.0,
        };
        let profile = make_btc(policy);
        let sig = make_signal(Direction::Buy, 0.0, 0.0);

        // quiet market → floors
        let d = transform(&policy, &sig, &profile, Some(20.0)).unwrap();
        assert_eq!(d, RiskDistances { stop: 40.0, target: 65.0 });

        // volatile market → ATR multiples
        let d = transform(&policy, &sig, &profile, Some(120.0)).unwrap();
        assert_eq!(d, RiskDistances { stop: 120.0, target: 180.0 });
    }

    #[test]
    fn test_atr_without_value_is_violation() {
        let policy = InstrumentProfile::default_policy("BTCUSD", "atr").unwrap();
        let profile = make_btc(policy);
        let err = transform(&policy, &make_signal(Direction::Buy, 1.0, 1.0), &profile, None).unwrap_err();
        assert!(matches!(err, EngineError::PolicyViolation(_)));
    }

    #[test]
    fn test_stop_is_clamped_into_band() {
        let policy = RiskPolicy::RatioMultiplier { sl_factor: 1.0, tp_factor: 1.0 };
        let profile = make_btc(policy);
        let d = transform(&policy, &make_signal(Direction::Buy, 5.0, 50.0), &profile, None).unwrap();
        assert_eq!(d.stop, profile.min_stop());

        let d = transform(&policy, &make_signal(Direction::Buy, 50_000.0, 2000.0), &profile, None).unwrap();
        assert_eq!(d.stop, profile.max_stop());
    }

    #[test]
    fn test_out_of_band_reward_risk_is_rejected() {
        let policy = RiskPolicy::FixedPips { sl_pips: 240.0, tp_pips: 70.0 };
        let mut profile = make_btc(policy);
        profile.min_reward_risk = 1.5;
        let err = transform(&policy, &make_signal(Direction::Buy, 0.0, 0.0), &profile, None).unwrap_err();
        assert!(err.to_string().contains("reward/risk"));
    }

    #[test]
    fn test_no_trade_is_never_sized() {
        let policy = RiskPolicy::FixedPips { sl_pips: 240.0, tp_pips: 70.0 };
        let profile = make_btc(policy);
        assert!(transform(&policy, &Signal::no_trade("BTCUSD"), &profile, None).is_err());
    }

    fn arb_policy() -> impl Strategy<Value = RiskPolicy> {
        prop_oneof![
            (0.1..5.0_f64, 0.05..3.0_f64)
                .prop_map(|(sl_factor, tp_factor)| RiskPolicy::RatioMultiplier { sl_factor, tp_factor }),
            (20.0..1000.0_f64, 10.0..1000.0_f64)
                .prop_map(|(sl_pips, tp_pips)| RiskPolicy::FixedPips { sl_pips, tp_pips }),
            (0.5..3.0_f64, 0.5..3.0_f64, 20.0..200.0_f64, 20.0..200.0_f64).prop_map(
                |(sl_atr_mult, tp_atr_mult, sl_floor_pips, tp_floor_pips)| RiskPolicy::AtrAdaptive {
                    sl_atr_mult,
                    tp_atr_mult,
                    sl_floor_pips,
                    tp_floor_pips,
                }
            ),
        ]
    }

    proptest! {
        /// Same inputs, same outputs; any Ok result sits inside every band.
        #[test]
        fn prop_transform_is_deterministic_and_bounded(
            policy in arb_policy(),
            raw_stop in 0.0..5000.0_f64,
            raw_target in 0.0..5000.0_f64,
            atr in 0.0..500.0_f64,
            buy in any::<bool>(),
        ) {
            let profile = make_btc(policy);
            let dir = if buy { Direction::Buy } else { Direction::Sell };
            let sig = make_signal(dir, raw_stop, raw_target);

            let first = transform(&policy, &sig, &profile, Some(atr));
            let second = transform(&policy, &sig, &profile, Some(atr));
            prop_assert_eq!(format!("{first:?}"), format!("{second:?}"));

            if let Ok(d) = first {
                prop_assert!(d.stop >= profile.min_stop() && d.stop <= profile.max_stop());
                prop_assert!(d.target >= profile.min_target() && d.target <= profile.max_target());
                let rr = d.reward_risk();
                prop_assert!(rr >= profile.min_reward_risk && rr <= profile.max_reward_risk);
            }
        }
    }
}
