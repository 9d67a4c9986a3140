//! # models::policy
//!
//! [`RiskPolicy`]: the tagged variant over the stop/target schemes the engine
//! can run. One policy is selected per instrument and stays fixed for the
//! lifetime of a cycle; it is consumed only by
//! [`engine::transform`](crate::engine::transform).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskPolicy {
    /// Scale the oracle's raw distances.
    RatioMultiplier { sl_factor: f64, tp_factor: f64 },
    /// Ignore the oracle's distances; fixed pip offsets from entry.
    FixedPips { sl_pips: f64, tp_pips: f64 },
    /// `max(floor, mult × ATR)` for each side.
    AtrAdaptive {
        sl_atr_mult: f64,
        tp_atr_mult: f64,
        sl_floor_pips: f64,
        tp_floor_pips: f64,
    },
}

impl RiskPolicy {
    /// Does the scheduler have to fetch an ATR value before transforming?
    pub fn needs_atr(&self) -> bool {
        matches!(self, RiskPolicy::AtrAdaptive { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RiskPolicy::RatioMultiplier { .. } => "RATIO_MULTIPLIER",
            RiskPolicy::FixedPips { .. } => "FIXED_PIPS",
            RiskPolicy::AtrAdaptive { .. } => "ATR_ADAPTIVE",
        }
    }

    /// Every factor, pip count and floor must be finite and strictly positive.
    pub fn validate(&self) -> Result<(), String> {
        let values: &[(&str, f64)] = match self {
            RiskPolicy::RatioMultiplier { sl_factor, tp_factor } => {
                &[("sl_factor", *sl_factor), ("tp_factor", *tp_factor)]
            }
            RiskPolicy::FixedPips { sl_pips, tp_pips } => {
                &[("sl_pips", *sl_pips), ("tp_pips", *tp_pips)]
            }
            RiskPolicy::AtrAdaptive {
                sl_atr_mult,
                tp_atr_mult,
                sl_floor_pips,
                tp_floor_pips,
            } => &[
                ("sl_atr_mult", *sl_atr_mult),
                ("tp_atr_mult", *tp_atr_mult),
                ("sl_floor_pips", *sl_floor_pips),
                ("tp_floor_pips", *tp_floor_pips),
            ],
        };

        match values.iter().find(|(_, v)| !(v.is_finite() && *v > 0.0)) {
            Some((name, v)) => Err(format!("{} {name} must be > 0 (got {v})", self.name())),
            None => Ok(()),
        }
    }
}

impl std::fmt::Display for RiskPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskPolicy::RatioMultiplier { sl_factor, tp_factor } => {
                write!(f, "RATIO_MULTIPLIER(sl×{sl_factor}, tp×{tp_factor})")
            }
            RiskPolicy::FixedPips { sl_pips, tp_pips } => {
                write!(f, "FIXED_PIPS(sl {sl_pips}p, tp {tp_pips}p)")
            }
            RiskPolicy::AtrAdaptive { sl_atr_mult, tp_atr_mult, sl_floor_pips, tp_floor_pips } => write!(
                f,
                "ATR_ADAPTIVE(sl max({sl_floor_pips}p, {sl_atr_mult}×ATR), tp max({tp_floor_pips}p, {tp_atr_mult}×ATR))"
            ),
        }
    }
}
