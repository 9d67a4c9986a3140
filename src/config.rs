//! # config
//!
//! อ่านค่าทั้งหมดจาก Environment Variables (หลัง `dotenvy::dotenv()`)
//! แล้ว validate ครั้งเดียวตอน startup ถ้าผิดจะไม่ยอม start
//!
//! ## Per-instrument overrides
//! ทุกค่าใน [`InstrumentProfile`] override ได้ด้วย prefix `{SYMBOL}_`
//!
//! ```bash
//! INSTRUMENTS=BTCUSD,XAUUSD
//! RISK_POLICY=atr                 # default ของทุก instrument
//! XAUUSD_RISK_POLICY=fixed        # gold ใช้ fixed pips
//! XAUUSD_SL_PIPS=450
//! BTCUSD_TRAIL_DISTANCE_PIPS=15
//! ```

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use chrono_tz::Tz;

use crate::engine::{CallPolicy, MonitorConfig, SchedulerConfig};
use crate::guards::hours::{SessionWindow, TradingHours};
use crate::guards::news::NewsConfig;
use crate::models::{InstrumentProfile, RiskPolicy};
use crate::risk::RiskConfig;

/// One week. Larger values overflow the chrono durations the risk gate builds.
const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 3600;

// ─── EngineConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Declared order = processing order of every cycle.
    pub instruments:   Vec<InstrumentProfile>,
    pub scheduler:     SchedulerConfig,
    pub monitor:       MonitorConfig,
    pub monitor_grace: Duration,
    pub risk:          RiskConfig,
    pub hours:         TradingHours,
    pub news:          NewsConfig,
    /// `mock` = in-memory paper venue
    pub mt5_base_url:  String,
    /// `None` = oracle that always answers NONE
    pub brain_url:     Option<String>,
    pub bind_addr:     SocketAddr,
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key → value source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let venue = CallPolicy::new(
            Duration::from_secs(env.parse("VENUE_TIMEOUT_SECS", 5u64)?),
            env.parse("VENUE_RETRIES", 2u32)?,
        );
        let analysis = CallPolicy::new(
            Duration::from_secs(env.parse("ANALYSIS_TIMEOUT_SECS", 30u64)?),
            env.parse("ANALYSIS_RETRIES", 1u32)?,
        );
        let min_confidence: f64 = env.parse("MIN_CONFIDENCE", 78.0)?;

        let scheduler = SchedulerConfig {
            min_recheck:    Duration::from_secs(env.parse("MIN_RECHECK_SECS", 60u64)?),
            max_recheck:    Duration::from_secs(env.parse("MAX_RECHECK_SECS", 120u64)?),
            max_concurrent: env.parse("MAX_CONCURRENT_TRADES", 2usize)?,
            min_confidence,
            atr_period:     env.parse("ATR_PERIOD", 14u32)?,
            venue,
            analysis,
        };

        let monitor = MonitorConfig {
            poll_interval:           Duration::from_secs(env.parse("MONITOR_POLL_SECS", 30u64)?),
            signal_refresh_polls:    env.parse("SIGNAL_REFRESH_POLLS", 1u32)?,
            breakeven_profit:        env.parse("BREAKEVEN_PROFIT", 50.0)?,
            trailing_profit:         env.parse("TRAILING_ACTIVATION_PROFIT", 60.0)?,
            reversal_min_confidence: min_confidence,
            venue,
            analysis,
        };

        let risk = RiskConfig {
            max_trades_per_day:          env.parse("RISK_MAX_TRADES_PER_DAY", 20u32)?,
            max_consecutive_failures:    env.parse("RISK_MAX_CONSECUTIVE_FAILS", 3u32)?,
            cooldown_secs_after_failure: env.parse("RISK_COOLDOWN_SECS", 300u64)?,
        };

        let timezone = env.string("TRADING_TIMEZONE", "Europe/Paris");
        let hours = TradingHours {
            enabled:  env.parse("TRADING_HOURS_ENABLED", true)?,
            timezone: Tz::from_str(&timezone).map_err(|e| anyhow!("TRADING_TIMEZONE: {e}"))?,
            windows:  match env.get("TRADING_WINDOWS") {
                Some(raw) => raw
                    .split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(SessionWindow::parse)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| anyhow!("TRADING_WINDOWS: {e}"))?,
                None => TradingHours::default_windows(),
            },
        };

        let news = NewsConfig {
            url:    env.get("NEWS_URL"),
            before: chrono::Duration::minutes(env.parse("NEWS_BLOCK_BEFORE_MINUTES", 60i64)?),
            after:  chrono::Duration::minutes(env.parse("NEWS_BLOCK_AFTER_MINUTES", 60i64)?),
            ..NewsConfig::default()
        };

        let default_kind = env.string("RISK_POLICY", "atr");
        let instruments = env
            .string("INSTRUMENTS", "BTCUSD,XAUUSD")
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .map(|symbol| instrument_from_env(&env, &symbol, &default_kind))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let config = Self {
            instruments,
            scheduler,
            monitor,
            monitor_grace: Duration::from_secs(env.parse("MONITOR_GRACE_SECS", 5u64)?),
            risk,
            hours,
            news,
            mt5_base_url: env.string("MT5_BASE_URL", "mock"),
            brain_url: env.get("BRAIN_URL"),
            bind_addr: env
                .string("BIND_ADDR", "0.0.0.0:3000")
                .parse()
                .context("BIND_ADDR")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instruments.is_empty() {
            bail!("INSTRUMENTS must name at least one symbol");
        }
        for (i, p) in self.instruments.iter().enumerate() {
            if self.instruments[..i].iter().any(|q| q.symbol == p.symbol) {
                bail!("INSTRUMENTS lists {} twice", p.symbol);
            }
            p.validate().map_err(|e| anyhow!(e))?;
        }
        let s = &self.scheduler;
        if s.min_recheck > s.max_recheck {
            bail!(
                "MIN_RECHECK_SECS ({}) must be <= MAX_RECHECK_SECS ({})",
                s.min_recheck.as_secs(),
                s.max_recheck.as_secs()
            );
        }
        if s.max_concurrent < 1 {
            bail!("MAX_CONCURRENT_TRADES must be >= 1");
        }
        if !(0.0..=100.0).contains(&s.min_confidence) {
            bail!("MIN_CONFIDENCE must be within 0..=100");
        }
        if self.monitor.poll_interval.is_zero() {
            bail!("MONITOR_POLL_SECS must be > 0");
        }
        if self.monitor.trailing_profit < self.monitor.breakeven_profit {
            bail!("TRAILING_ACTIVATION_PROFIT must be >= BREAKEVEN_PROFIT");
        }
        if self.risk.cooldown_secs_after_failure > MAX_COOLDOWN_SECS {
            bail!("RISK_COOLDOWN_SECS must be <= {MAX_COOLDOWN_SECS}");
        }
        if self.hours.enabled && self.hours.windows.is_empty() {
            bail!("TRADING_WINDOWS is empty while TRADING_HOURS_ENABLED=true");
        }
        Ok(())
    }

    pub fn uses_paper_venue(&self) -> bool {
        self.mt5_base_url.eq_ignore_ascii_case("mock")
    }
}

// ─── Instrument profile from env ──────────────────────────────────────────────

fn instrument_from_env<F>(env: &Env<F>, symbol: &str, default_kind: &str) -> anyhow::Result<InstrumentProfile>
where
    F: Fn(&str) -> Option<String>,
{
    let key = |field: &str| format!("{symbol}_{field}");

    let kind = env.string(&key("RISK_POLICY"), default_kind);
    let policy = InstrumentProfile::default_policy(symbol, &kind)
        .ok_or_else(|| anyhow!("{}: unknown risk policy '{kind}' (ratio | fixed | atr)", key("RISK_POLICY")))?;

    let policy = match policy {
        RiskPolicy::RatioMultiplier { sl_factor, tp_factor } => RiskPolicy::RatioMultiplier {
            sl_factor: env.parse(&key("SL_FACTOR"), sl_factor)?,
            tp_factor: env.parse(&key("TP_FACTOR"), tp_factor)?,
        },
        RiskPolicy::FixedPips { sl_pips, tp_pips } => RiskPolicy::FixedPips {
            sl_pips: env.parse(&key("SL_PIPS"), sl_pips)?,
            tp_pips: env.parse(&key("TP_PIPS"), tp_pips)?,
        },
        RiskPolicy::AtrAdaptive { sl_atr_mult, tp_atr_mult, sl_floor_pips, tp_floor_pips } => {
            RiskPolicy::AtrAdaptive {
                sl_atr_mult:   env.parse(&key("SL_ATR_MULT"), sl_atr_mult)?,
                tp_atr_mult:   env.parse(&key("TP_ATR_MULT"), tp_atr_mult)?,
                sl_floor_pips: env.parse(&key("SL_FLOOR_PIPS"), sl_floor_pips)?,
                tp_floor_pips: env.parse(&key("TP_FLOOR_PIPS"), tp_floor_pips)?,
            }
        }
    };
    policy.validate().map_err(|e| anyhow!("{symbol}: {e}"))?;

    let base = InstrumentProfile::builtin(symbol, policy);
    Ok(InstrumentProfile {
        pip_size:              env.parse(&key("PIP_SIZE"), base.pip_size)?,
        lot_size:              env.parse(&key("LOT_SIZE"), base.lot_size)?,
        min_stop_pips:         env.parse(&key("MIN_STOP_PIPS"), base.min_stop_pips)?,
        max_stop_pips:         env.parse(&key("MAX_STOP_PIPS"), base.max_stop_pips)?,
        min_target_pips:       env.parse(&key("MIN_TARGET_PIPS"), base.min_target_pips)?,
        max_target_pips:       env.parse(&key("MAX_TARGET_PIPS"), base.max_target_pips)?,
        min_reward_risk:       env.parse(&key("MIN_RR"), base.min_reward_risk)?,
        max_reward_risk:       env.parse(&key("MAX_RR"), base.max_reward_risk)?,
        breakeven_buffer_pips: env.parse(&key("BREAKEVEN_BUFFER_PIPS"), base.breakeven_buffer_pips)?,
        trail_distance_pips:   env.parse(&key("TRAIL_DISTANCE_PIPS"), base.trail_distance_pips)?,
        trail_step_pips:       env.parse(&key("TRAIL_STEP_PIPS"), base.trail_step_pips)?,
        news_currencies:       match env.get(&key("NEWS_CURRENCIES")) {
            Some(raw) => raw
                .split(',')
                .map(|c| c.trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
            None => base.news_currencies.clone(),
        },
        ..base
    })
}

// ─── Env helpers ──────────────────────────────────────────────────────────────

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Missing → `default`; present but unparsable → error naming the key.
    fn parse<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e| anyhow!("{key}={raw:?}: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<EngineConfig> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        EngineConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults_match_documented_table() {
        let cfg = load(&[]).unwrap();
        assert_eq!(
            cfg.instruments.iter().map(|p| p.symbol.as_str()).collect::<Vec<_>>(),
            ["BTCUSD", "XAUUSD"]
        );
        assert_eq!(cfg.scheduler.min_recheck, Duration::from_secs(60));
        assert_eq!(cfg.scheduler.max_recheck, Duration::from_secs(120));
        assert_eq!(cfg.scheduler.max_concurrent, 2);
        assert_eq!(cfg.scheduler.min_confidence, 78.0);
        assert_eq!(cfg.monitor.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.monitor.reversal_min_confidence, 78.0);
        assert_eq!(cfg.monitor.breakeven_profit, 50.0);
        assert_eq!(cfg.monitor.trailing_profit, 60.0);
        assert_eq!(cfg.monitor_grace, Duration::from_secs(5));
        assert!(cfg.uses_paper_venue());
        assert!(cfg.brain_url.is_none());
        assert_eq!(cfg.hours.timezone, chrono_tz::Europe::Paris);
        assert_eq!(cfg.hours.windows.len(), 2);
        assert!(cfg.instruments.iter().all(|p| p.policy.needs_atr()));
    }

    #[test]
    fn test_per_symbol_overrides() {
        let cfg = load(&[
            ("RISK_POLICY", "ratio"),
            ("XAUUSD_RISK_POLICY", "fixed"),
            ("XAUUSD_SL_PIPS", "450"),
            ("BTCUSD_TRAIL_DISTANCE_PIPS", "15"),
            ("BTCUSD_NEWS_CURRENCIES", "usd, eur"),
        ])
        .unwrap();
        let btc = &cfg.instruments[0];
        let xau = &cfg.instruments[1];
        assert_eq!(btc.policy, RiskPolicy::RatioMultiplier { sl_factor: 2.5, tp_factor: 0.15 });
        assert_eq!(btc.trail_distance_pips, 15.0);
        assert_eq!(btc.news_currencies, ["USD", "EUR"]);
        assert_eq!(xau.policy, RiskPolicy::FixedPips { sl_pips: 450.0, tp_pips: 140.0 });
        assert_eq!(xau.pip_size, 0.01);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(load(&[("MIN_RECHECK_SECS", "200"), ("MAX_RECHECK_SECS", "100")]).is_err());
        assert!(load(&[("MAX_CONCURRENT_TRADES", "0")]).is_err());
        assert!(load(&[("MAX_CONCURRENT_TRADES", "two")]).is_err());
        assert!(load(&[("INSTRUMENTS", " , ")]).is_err());
        assert!(load(&[("INSTRUMENTS", "BTCUSD,BTCUSD")]).is_err());
        assert!(load(&[("RISK_POLICY", "martingale")]).is_err());
        assert!(load(&[("XAUUSD_PIP_SIZE", "0")]).is_err());
        assert!(load(&[("BTCUSD_MIN_STOP_PIPS", "2000")]).is_err());
        assert!(load(&[("TRADING_TIMEZONE", "Mars/Olympus")]).is_err());
        assert!(load(&[("TRADING_WINDOWS", "8am-noon")]).is_err());
        assert!(load(&[("RISK_COOLDOWN_SECS", "18446744073709551615")]).is_err());
        assert!(load(&[("RISK_COOLDOWN_SECS", "604800")]).is_ok());
    }

    #[test]
    fn test_windows_and_unknown_symbol() {
        let cfg = load(&[("INSTRUMENTS", "ethusd"), ("TRADING_WINDOWS", "00:00-23:59")]).unwrap();
        assert_eq!(cfg.instruments[0].symbol, "ETHUSD");
        assert_eq!(cfg.instruments[0].pip_size, 1.0);
        assert_eq!(cfg.hours.windows.len(), 1);
    }
}
