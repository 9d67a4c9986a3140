//! # models::position
//!
//! Defines [`Position`], a snapshot of what the venue reports for one
//! instrument, and [`MonitorState`], the per-instrument breakeven/trailing
//! record owned by that instrument's monitor.
//!
//! ## Why separate from Signal?
//! `Signal`   = what the oracle suggests (advice, may be superseded)
//! `Position` = what is really open at the venue (source of truth, never cached
//!              beyond one poll or one cycle)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Direction;

/// Opaque venue-assigned id.
pub type Ticket = u64;

// ─── Position ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub ticket: Ticket,
    pub direction: Direction,
    pub volume: f64,
    pub open_price: f64,
    /// Price the position would close at right now (bid for BUY, ask for SELL).
    pub current_price: f64,
    /// `None` = no stop set at the venue.
    pub current_stop: Option<f64>,
    pub current_target: Option<f64>,
    pub opened_at: DateTime<Utc>,
    /// In account currency.
    pub unrealized_pnl: f64,
}

impl Position {
    /// Entry price shifted by `buffer` in the profitable direction.
    pub fn breakeven_stop(&self, buffer: f64) -> f64 {
        self.open_price + self.direction.sign() * buffer
    }

    /// Stop that trails the current price at `distance`.
    pub fn trailing_stop(&self, distance: f64) -> f64 {
        self.current_price - self.direction.sign() * distance
    }

    /// Would moving the stop to `candidate` reduce risk versus the current one?
    pub fn improves_stop(&self, candidate: f64) -> bool {
        reduces_risk(self.direction, self.current_stop, candidate)
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.opened_at)
    }
}

/// A stop may only move toward profit: up for BUY, down for SELL. Any stop is
/// better than none.
pub fn reduces_risk(direction: Direction, current: Option<f64>, candidate: f64) -> bool {
    match (direction, current) {
        (Direction::NoTrade, _) => false,
        (_, None) => true,
        (Direction::Buy, Some(cur)) => candidate > cur,
        (Direction::Sell, Some(cur)) => candidate < cur,
    }
}

// ─── MonitorPhase ─────────────────────────────────────────────────────────────

/// Protection phase of an open position. Ordered: the derive on `Ord` is what
/// [`MonitorState::advance`] relies on to refuse regressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorPhase {
    NoSlProtection,
    Protected,
    Trailing,
}

impl std::fmt::Display for MonitorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MonitorPhase::NoSlProtection => "NO_SL_PROTECTION",
            MonitorPhase::Protected => "PROTECTED",
            MonitorPhase::Trailing => "TRAILING",
        })
    }
}

// ─── MonitorState ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorState {
    pub phase: MonitorPhase,
    /// Ticket this state belongs to; a different ticket means a fresh position.
    pub ticket: Option<Ticket>,
    pub last_known_stop: Option<f64>,
    pub high_water_profit: f64,
    /// Price at the last trailing-stop update (hysteresis anchor).
    pub last_trail_price: Option<f64>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self {
            phase: MonitorPhase::NoSlProtection,
            ticket: None,
            last_known_stop: None,
            high_water_profit: 0.0,
            last_trail_price: None,
        }
    }

    /// Back to NO_SL_PROTECTION. Only legal once the position is gone.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Move forward to `next`. Returns `false` (and changes nothing) for a
    /// regression or a self-transition.
    pub fn advance(&mut self, next: MonitorPhase) -> bool {
        if next <= self.phase {
            return false;
        }
        self.phase = next;
        true
    }

    /// Sync with the venue snapshot of the supervised position.
    pub fn observe(&mut self, position: &Position) {
        if self.ticket != Some(position.ticket) {
            self.reset();
            self.ticket = Some(position.ticket);
        }
        self.last_known_stop = position.current_stop;
        if position.unrealized_pnl > self.high_water_profit {
            self.high_water_profit = position.unrealized_pnl;
        }
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}
