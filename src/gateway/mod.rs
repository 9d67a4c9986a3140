//! # gateway
//!
//! Boundaries to the outside world. The engine only talks to these traits;
//! [`mt5::Mt5Bridge`] and [`oracle::BrainClient`] are the live adapters,
//! [`paper::PaperVenue`] the in-memory venue used in mock mode and tests.
//!
//! Implementations do not retry or time out on their own; callers wrap every
//! call with [`engine::retry::bounded`](crate::engine::retry::bounded).

pub mod mt5;
pub mod oracle;
pub mod paper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::transform::RiskDistances;
use crate::error::EngineError;
use crate::models::{Direction, Position, Signal, Ticket};

// ─── Orders ───────────────────────────────────────────────────────────────────

/// Market order with unsigned distances; the venue turns them into absolute
/// levels against the price it actually fills at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenOrder {
    pub symbol:          String,
    pub direction:       Direction,
    pub stop_distance:   f64,
    pub target_distance: f64,
    pub volume:          f64,
    pub comment:         String,
}

impl OpenOrder {
    /// Absolute (stop, target) for a fill at `entry`.
    pub fn levels_at(&self, entry: f64) -> (f64, f64) {
        RiskDistances { stop: self.stop_distance, target: self.target_distance }.levels(self.direction, entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    /// Price a new position in `direction` fills at.
    pub fn entry_for(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Sell => self.bid,
            _ => self.ask,
        }
    }

    /// Price an open position in `direction` closes at.
    pub fn exit_for(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Sell => self.ask,
            _ => self.bid,
        }
    }
}

// ─── Collaborator traits ──────────────────────────────────────────────────────

#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// The single open position for `symbol`, if any. More than one is an
    /// [`EngineError::InvariantViolation`].
    async fn get_open_position(&self, symbol: &str) -> Result<Option<Position>, EngineError>;

    /// Open positions across every symbol (global cap check).
    async fn open_positions_total(&self) -> Result<usize, EngineError>;

    async fn open(&self, order: &OpenOrder) -> Result<Position, EngineError>;

    async fn modify_stop(&self, ticket: Ticket, new_stop: f64) -> Result<(), EngineError>;

    async fn close(&self, ticket: Ticket) -> Result<(), EngineError>;
}

#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Result<Quote, EngineError>;

    async fn current_atr(&self, symbol: &str, period: u32) -> Result<f64, EngineError>;
}

#[async_trait]
pub trait SignalOracle: Send + Sync {
    /// May be slow; callers bound it.
    async fn analyze(&self, symbol: &str) -> Result<Signal, EngineError>;
}

/// Gates checked before anything is opened. Each answer is final for the
/// cycle; adapters swallow their own fetch errors.
#[async_trait]
pub trait Preconditions: Send + Sync {
    async fn news_blackout_active(&self, symbol: &str, now: DateTime<Utc>) -> bool;

    async fn trading_hours_open(&self, now: DateTime<Utc>) -> bool;

    async fn structural_filters_pass(&self, symbol: &str) -> (bool, Vec<String>);
}
