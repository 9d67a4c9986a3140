//! # models::instrument
//!
//! Static per-instrument profile: pip size, distance bands, trailing
//! parameters and the active [`RiskPolicy`]. Built once at startup by
//! [`EngineConfig`](crate::config::EngineConfig) and never mutated.
//!
//! All `*_pips` fields are in pips; multiply by `pip_size` for price units
//! (BTCUSD: 1 pip = 1.0, XAUUSD: 1 pip = 0.01).

use serde::Serialize;

use crate::models::RiskPolicy;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentProfile {
    pub symbol:    String,
    pub pip_size:  f64,
    /// Volume sent with every open.
    pub lot_size:  f64,

    // ── Distance bands (pips) ────────────────────────────────────────────────
    pub min_stop_pips:   f64,
    pub max_stop_pips:   f64,
    pub min_target_pips: f64,
    pub max_target_pips: f64,

    /// Acceptable reward/risk band (target distance ÷ stop distance).
    pub min_reward_risk: f64,
    pub max_reward_risk: f64,

    // ── Monitor parameters (pips) ────────────────────────────────────────────
    pub breakeven_buffer_pips: f64,
    pub trail_distance_pips:   f64,
    pub trail_step_pips:       f64,

    /// Currencies whose high-impact news blacks this instrument out.
    pub news_currencies: Vec<String>,

    pub policy:         RiskPolicy,
    /// Bumped whenever `policy` is replaced; logged with every transform.
    pub policy_version: u32,
}

impl InstrumentProfile {
    /// Bitcoin, 1 pip = $1.
    pub fn btcusd(policy: RiskPolicy) -> Self {
        Self {
            symbol:                "BTCUSD".into(),
            pip_size:              1.0,
            lot_size:              1.0,
            min_stop_pips:         20.0,
            max_stop_pips:         1000.0,
            min_target_pips:       10.0,
            max_target_pips:       2000.0,
            min_reward_risk:       0.1,
            max_reward_risk:       10.0,
            breakeven_buffer_pips: 2.0,
            trail_distance_pips:   10.0,
            trail_step_pips:       1.0,
            news_currencies:       vec!["USD".into()],
            policy,
            policy_version:        1,
        }
    }

    /// Gold, 1 pip = $0.01.
    pub fn xauusd(policy: RiskPolicy) -> Self {
        Self {
            symbol:                "XAUUSD".into(),
            pip_size:              0.01,
            lot_size:              1.0,
            min_stop_pips:         25.0,
            max_stop_pips:         1000.0,
            min_target_pips:       5.0,
            max_target_pips:       2000.0,
            min_reward_risk:       0.1,
            max_reward_risk:       10.0,
            breakeven_buffer_pips: 2.0,
            trail_distance_pips:   10.0,
            trail_step_pips:       1.0,
            news_currencies:       vec!["USD".into()],
            policy,
            policy_version:        1,
        }
    }

    /// Built-in policy defaults per symbol and policy kind (`ratio` / `fixed` / `atr`).
    pub fn default_policy(symbol: &str, kind: &str) -> Option<RiskPolicy> {
        let gold = symbol.eq_ignore_ascii_case("XAUUSD");
        let policy = match kind.to_ascii_lowercase().as_str() {
            "ratio" => RiskPolicy::RatioMultiplier { sl_factor: 2.5, tp_factor: 0.15 },
            "fixed" if gold => RiskPolicy::FixedPips { sl_pips: 500.0, tp_pips: 140.0 },
            "fixed" => RiskPolicy::FixedPips { sl_pips: 240.0, tp_pips: 70.0 },
            "atr" => RiskPolicy::AtrAdaptive {
                sl_atr_mult:   1.0,
                tp_atr_mult:   1.5,
                sl_floor_pips: if gold { 70.0 } else { 40.0 },
                tp_floor_pips: if gold { 140.0 } else { 65.0 },
            },
            _ => return None,
        };
        Some(policy)
    }

    /// Built-in profile for a known symbol, falling back to BTCUSD-like
    /// defaults (pip 1.0) with the symbol renamed.
    pub fn builtin(symbol: &str, policy: RiskPolicy) -> Self {
        if symbol.eq_ignore_ascii_case("XAUUSD") {
            Self::xauusd(policy)
        } else {
            Self { symbol: symbol.to_string(), ..Self::btcusd(policy) }
        }
    }

    // ── Pip → price ──────────────────────────────────────────────────────────

    #[inline]
    pub fn pips(&self, pips: f64) -> f64 {
        pips * self.pip_size
    }

    pub fn min_stop(&self) -> f64 { self.pips(self.min_stop_pips) }
    pub fn max_stop(&self) -> f64 { self.pips(self.max_stop_pips) }
    pub fn min_target(&self) -> f64 { self.pips(self.min_target_pips) }
    pub fn max_target(&self) -> f64 { self.pips(self.max_target_pips) }
    pub fn breakeven_buffer(&self) -> f64 { self.pips(self.breakeven_buffer_pips) }
    pub fn trail_distance(&self) -> f64 { self.pips(self.trail_distance_pips) }
    pub fn trail_step(&self) -> f64 { self.pips(self.trail_step_pips) }

    /// Internal consistency check run once at startup.
    pub fn validate(&self) -> Result<(), String> {
        let sym = &self.symbol;
        if !(self.pip_size.is_finite() && self.pip_size > 0.0) {
            return Err(format!("{sym}: pip_size must be > 0"));
        }
        if !(self.lot_size > 0.0) {
            return Err(format!("{sym}: lot_size must be > 0"));
        }
        if !(self.min_stop_pips > 0.0 && self.min_stop_pips <= self.max_stop_pips) {
            return Err(format!(
                "{sym}: stop band [{}, {}] pips is empty",
                self.min_stop_pips, self.max_stop_pips
            ));
        }
        if !(self.min_target_pips > 0.0 && self.min_target_pips <= self.max_target_pips) {
            return Err(format!(
                "{sym}: target band [{}, {}] pips is empty",
                self.min_target_pips, self.max_target_pips
            ));
        }
        if !(self.min_reward_risk > 0.0 && self.min_reward_risk <= self.max_reward_risk) {
            return Err(format!(
                "{sym}: reward/risk band [{}, {}] is empty",
                self.min_reward_risk, self.max_reward_risk
            ));
        }
        if self.trail_distance_pips <= 0.0 || self.trail_step_pips < 0.0 || self.breakeven_buffer_pips < 0.0 {
            return Err(format!("{sym}: trailing parameters must be non-negative"));
        }
        self.policy.validate().map_err(|e| format!("{sym}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pip_conversion() {
        let gold = InstrumentProfile::xauusd(InstrumentProfile::default_policy("XAUUSD", "fixed").unwrap());
        assert!((gold.pips(500.0) - 5.0).abs() < 1e-9);
        assert!((gold.trail_distance() - 0.1).abs() < 1e-9);

        let btc = InstrumentProfile::btcusd(InstrumentProfile::default_policy("BTCUSD", "fixed").unwrap());
        assert_eq!(btc.breakeven_buffer(), 2.0);
    }

    #[test]
    fn test_builtin_profiles_validate() {
        for kind in ["ratio", "fixed", "atr"] {
            for sym in ["BTCUSD", "XAUUSD", "ETHUSD"] {
                let policy = InstrumentProfile::default_policy(sym, kind).unwrap();
                let profile = InstrumentProfile::builtin(sym, policy);
                assert_eq!(profile.symbol, sym);
                profile.validate().unwrap();
            }
        }
        assert!(InstrumentProfile::default_policy("BTCUSD", "martingale").is_none());
    }

    #[test]
    fn test_empty_band_rejected() {
        let mut p = InstrumentProfile::btcusd(RiskPolicy::FixedPips { sl_pips: 240.0, tp_pips: 70.0 });
        p.min_reward_risk = 3.0;
        p.max_reward_risk = 2.0;
        assert!(p.validate().unwrap_err().contains("reward/risk"));
    }
}
