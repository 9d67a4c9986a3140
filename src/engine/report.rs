//! # engine::report
//!
//! Per-cycle status lines (one per instrument) and the in-memory decision
//! journal behind `/api/monitor/status` and `/api/monitor/history`.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Direction, MonitorPhase, Ticket};

/// History entries kept in memory.
pub const JOURNAL_CAPACITY: usize = 500;

// ─── Decision ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Opened {
        ticket:     Ticket,
        direction:  Direction,
        confidence: f64,
        stop:       Option<f64>,
        target:     Option<f64>,
    },
    /// Position already open; its monitor owns it.
    Monitored {
        elapsed_secs:    i64,
        monitor_running: bool,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    CapReached { open: usize, cap: usize },
    VenueError(String),
    MarketClosed,
    NewsBlackout,
    StructuralFilters(Vec<String>),
    AnalysisFailed(String),
    NoDirection,
    BelowThreshold { confidence: f64, min: f64 },
    PolicyViolation(String),
    RiskBlocked(String),
    OpenFailed(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::CapReached { open, cap } => write!(f, "position cap reached ({open}/{cap})"),
            SkipReason::VenueError(e) => write!(f, "venue error: {e}"),
            SkipReason::MarketClosed => f.write_str("outside trading hours"),
            SkipReason::NewsBlackout => f.write_str("high-impact news blackout"),
            SkipReason::StructuralFilters(reasons) => {
                write!(f, "structural filters failed: {}", reasons.join("; "))
            }
            SkipReason::AnalysisFailed(e) => write!(f, "analysis failed: {e}"),
            SkipReason::NoDirection => f.write_str("no trade signal"),
            SkipReason::BelowThreshold { confidence, min } => {
                write!(f, "confidence {confidence:.0}% below threshold {min:.0}%")
            }
            SkipReason::PolicyViolation(e) => write!(f, "policy violation: {e}"),
            SkipReason::RiskBlocked(e) => write!(f, "risk gate: {e}"),
            SkipReason::OpenFailed(e) => write!(f, "open failed: {e}"),
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Opened { ticket, direction, confidence, .. } => {
                write!(f, "opened {direction} #{ticket} ({confidence:.0}%)")
            }
            Decision::Monitored { elapsed_secs, monitor_running } => write!(
                f,
                "monitored for {}m{:02}s{}",
                elapsed_secs / 60,
                elapsed_secs % 60,
                if *monitor_running { "" } else { " (monitor not running)" }
            ),
            Decision::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

// ─── StatusLine ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusLine {
    pub decision_id:    Uuid,
    pub cycle:          u64,
    pub symbol:         String,
    pub phase:          Option<MonitorPhase>,
    pub ticket:         Option<Ticket>,
    pub unrealized_pnl: Option<f64>,
    pub decision:       Decision,
    pub at:             DateTime<Utc>,
}

impl StatusLine {
    pub fn new(cycle: u64, symbol: &str, decision: Decision) -> Self {
        Self {
            decision_id:    Uuid::new_v4(),
            cycle,
            symbol:         symbol.to_string(),
            phase:          None,
            ticket:         None,
            unrealized_pnl: None,
            decision,
            at:             Utc::now(),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self.decision, Decision::Skipped { .. })
    }
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.symbol)?;
        if let Some(phase) = self.phase {
            write!(f, " {phase}")?;
        }
        if let Some(ticket) = self.ticket {
            write!(f, " #{ticket}")?;
        }
        if let Some(pnl) = self.unrealized_pnl {
            write!(f, " P/L {pnl:+.2}")?;
        }
        write!(f, " → {}", self.decision)
    }
}

// ─── Journal ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Journal {
    latest:  RwLock<HashMap<String, StatusLine>>,
    history: RwLock<VecDeque<StatusLine>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, line: StatusLine) {
        self.latest.write().await.insert(line.symbol.clone(), line.clone());
        let mut history = self.history.write().await;
        if history.len() >= JOURNAL_CAPACITY {
            history.pop_front();
        }
        history.push_back(line);
    }

    pub async fn latest(&self) -> HashMap<String, StatusLine> {
        self.latest.read().await.clone()
    }

    pub async fn latest_for(&self, symbol: &str) -> Option<StatusLine> {
        self.latest.read().await.get(symbol).cloned()
    }

    /// Newest last.
    pub async fn history(&self, limit: usize) -> Vec<StatusLine> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_renders_reason() {
        let mut line = StatusLine::new(
            3,
            "XAUUSD",
            Decision::Skipped {
                reason: SkipReason::BelowThreshold { confidence: 61.0, min: 78.0 },
            },
        );
        assert_eq!(line.to_string(), "[XAUUSD] → skipped: confidence 61% below threshold 78%");

        line.phase = Some(MonitorPhase::Trailing);
        line.ticket = Some(9);
        line.unrealized_pnl = Some(72.5);
        line.decision = Decision::Monitored { elapsed_secs: 125, monitor_running: true };
        assert_eq!(line.to_string(), "[XAUUSD] TRAILING #9 P/L +72.50 → monitored for 2m05s");
    }

    #[tokio::test]
    async fn test_journal_is_bounded() {
        let journal = Journal::new();
        for cycle in 0..(JOURNAL_CAPACITY as u64 + 10) {
            journal
                .record(StatusLine::new(cycle, "BTCUSD", Decision::Skipped { reason: SkipReason::NoDirection }))
                .await;
        }
        let all = journal.history(usize::MAX).await;
        assert_eq!(all.len(), JOURNAL_CAPACITY);
        assert_eq!(all.last().unwrap().cycle, JOURNAL_CAPACITY as u64 + 9);
        assert_eq!(journal.history(5).await.len(), 5);
        assert_eq!(journal.latest().await.len(), 1);
    }
}
