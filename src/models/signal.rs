//! # models::signal
//!
//! Defines [`Signal`]: the directional suggestion produced by the external
//! analysis oracle. A signal is immutable once created; a newer signal for the
//! same instrument supersedes it in the [`SignalStore`](crate::engine::signal_store::SignalStore).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Direction ────────────────────────────────────────────────────────────────

/// Directional bias of a signal or side of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Buy,
    Sell,
    /// Neutral: the oracle sees no edge; nothing may be opened on it.
    #[serde(alias = "NONE", alias = "NO TRADE")]
    NoTrade,
}

impl Direction {
    /// +1 for BUY, -1 for SELL, 0 for NO_TRADE. Multiplies a distance into a
    /// signed price offset in the profitable direction.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
            Direction::NoTrade => 0.0,
        }
    }

    #[inline]
    pub fn is_actionable(self) -> bool {
        self != Direction::NoTrade
    }

    /// `true` when `other` points the opposite way. NO_TRADE never reverses
    /// anything.
    pub fn is_reversed_by(self, other: Direction) -> bool {
        self.is_actionable() && other.is_actionable() && self != other
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::NoTrade => "NONE",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Signal ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    /// 0–100.
    pub confidence: f64,
    /// Stop distance suggested by the oracle, in price units.
    pub raw_stop_distance: f64,
    /// Target distance suggested by the oracle, in price units.
    pub raw_target_distance: f64,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        direction: Direction,
        confidence: f64,
        raw_stop_distance: f64,
        raw_target_distance: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            confidence: confidence.clamp(0.0, 100.0),
            raw_stop_distance: raw_stop_distance.abs(),
            raw_target_distance: raw_target_distance.abs(),
            generated_at: Utc::now(),
        }
    }

    /// A neutral signal, used when the oracle has nothing to say.
    pub fn no_trade(symbol: impl Into<String>) -> Self {
        Self::new(symbol, Direction::NoTrade, 0.0, 0.0, 0.0)
    }
}
