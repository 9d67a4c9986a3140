//! # guards::hours
//!
//! Trading session windows on a local wall clock (default CET/CEST).
//!
//! ```text
//! Mon–Fri   08:00 ─ 12:00   morning
//!           13:00 ─ 03:00   afternoon/night (wraps past midnight)
//! Sat, Sun  closed
//! ```
//!
//! The weekday is the local day of `now`, so Monday 02:00 falls inside the
//! wrapped window while Saturday 02:00 does not.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionWindow {
    pub start: NaiveTime,
    pub end:   NaiveTime,
}

impl SessionWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    /// `"13:00-03:00"`
    pub fn parse(s: &str) -> Result<Self, String> {
        let (start, end) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("session window '{s}' must look like HH:MM-HH:MM"))?;
        let parse = |v: &str| {
            NaiveTime::parse_from_str(v.trim(), "%H:%M").map_err(|e| format!("bad time '{v}': {e}"))
        };
        Ok(Self { start: parse(start)?, end: parse(end)? })
    }
}

#[derive(Debug, Clone)]
pub struct TradingHours {
    pub enabled:  bool,
    pub timezone: Tz,
    pub windows:  Vec<SessionWindow>,
}

impl TradingHours {
    pub fn default_windows() -> Vec<SessionWindow> {
        let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        vec![
            SessionWindow { start: hm(8, 0), end: hm(12, 0) },
            SessionWindow { start: hm(13, 0), end: hm(3, 0) },
        ]
    }

    #[cfg(test)]
    pub fn always_open() -> Self {
        Self { enabled: false, timezone: chrono_tz::Europe::Paris, windows: Vec::new() }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let local = now.with_timezone(&self.timezone);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let t = local.time();
        self.windows.iter().any(|w| w.contains(t))
    }
}
