//! # engine::monitor
//!
//! **Position Monitor** — 1 task ต่อ 1 instrument ดูแล Position ที่เปิดอยู่
//!
//! ## State machine
//!
//! ```text
//!   NO_SL_PROTECTION ──(pnl ≥ breakeven_profit)──▶ PROTECTED ──(pnl ≥ trailing_profit)──▶ TRAILING
//!          │                 SL → entry ± buffer        │            SL → price ∓ trail      │
//!          └──────────────── reversal signal ───────────┴────────────────────────────────────┴──▶ CLOSE
//! ```
//!
//! ## ต่อ 1 poll
//! 1. อ่าน Position จาก venue (ไม่มี → จบ, ticket ใหม่ → reset แล้ว adopt)
//! 2. refresh Signal จาก oracle ทุก N polls → SignalStore
//! 3. Signal กลับทิศ + confidence ถึง → close (ห้ามแก้ SL ใน poll เดียวกัน)
//! 4. ไม่งั้นทำ breakeven / trailing ได้อย่างมาก 1 คำสั่ง
//!
//! SL ขยับได้ทางเดียว (ลด risk) เทียบกับค่าที่ venue รายงานเสมอ

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::retry::{bounded, CallPolicy};
use crate::engine::signal_store::SignalStore;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::gateway::{ExecutionGateway, SignalOracle};
use crate::models::{InstrumentProfile, MonitorPhase, MonitorState, Position, Ticket};

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval:           Duration,
    /// Ask the oracle every N polls (0 = never, rely on the Scheduler's store writes).
    pub signal_refresh_polls:    u32,
    /// Unrealized P/L (account currency) that arms breakeven.
    pub breakeven_profit:        f64,
    /// Unrealized P/L that arms trailing.
    pub trailing_profit:         f64,
    /// Opposite signal must be at least this confident to force a close.
    pub reversal_min_confidence: f64,
    pub venue:                   CallPolicy,
    pub analysis:                CallPolicy,
}

/// Shared by every monitor the supervisor spawns.
pub struct MonitorContext {
    pub venue:   Arc<dyn ExecutionGateway>,
    pub oracle:  Arc<dyn SignalOracle>,
    pub signals: SignalStore,
    pub events:  EventBus,
    pub config:  MonitorConfig,
}

// ─── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    /// Closed at the venue by someone else (SL/TP hit, manual).
    PositionGone,
    ReversalClosed { ticket: Ticket },
    InvariantViolation { detail: String },
    Cancelled,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::PositionGone => f.write_str("position no longer at venue"),
            ExitReason::ReversalClosed { ticket } => write!(f, "closed #{ticket} on reversal"),
            ExitReason::InvariantViolation { detail } => write!(f, "invariant violation: {detail}"),
            ExitReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Continue,
    Exit(ExitReason),
}

/// What the operator sees for a running monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub symbol:         String,
    pub generation:     u64,
    pub state:          MonitorState,
    pub unrealized_pnl: Option<f64>,
    pub current_price:  Option<f64>,
    pub polls:          u64,
    pub last_error:     Option<String>,
    pub updated_at:     DateTime<Utc>,
}

// ─── PositionMonitor ──────────────────────────────────────────────────────────

pub struct PositionMonitor {
    profile:    Arc<InstrumentProfile>,
    ctx:        Arc<MonitorContext>,
    state:      MonitorState,
    generation: u64,
    polls:      u64,
    snapshot:   watch::Sender<MonitorSnapshot>,
}

impl PositionMonitor {
    pub fn new(
        profile: Arc<InstrumentProfile>,
        ctx: Arc<MonitorContext>,
        generation: u64,
    ) -> (Self, watch::Receiver<MonitorSnapshot>) {
        let state = MonitorState::new();
        let (snapshot, rx) = watch::channel(MonitorSnapshot {
            symbol: profile.symbol.clone(),
            generation,
            state: state.clone(),
            unrealized_pnl: None,
            current_price: None,
            polls: 0,
            last_error: None,
            updated_at: Utc::now(),
        });
        (Self { profile, ctx, state, generation, polls: 0, snapshot }, rx)
    }

    pub fn symbol(&self) -> &str {
        &self.profile.symbol
    }

    #[cfg(test)]
    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Poll until the position is gone, closed, inconsistent, or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> ExitReason {
        info!(symbol = %self.symbol(), generation = self.generation, "👁️ monitor started");
        let reason = loop {
            if cancel.is_cancelled() {
                break ExitReason::Cancelled;
            }
            if let PollOutcome::Exit(reason) = self.poll().await {
                break reason;
            }
            tokio::select! {
                _ = cancel.cancelled() => break ExitReason::Cancelled,
                _ = tokio::time::sleep(self.ctx.config.poll_interval) => {}
            }
        };
        info!(symbol = %self.symbol(), %reason, "👁️ monitor stopped");
        reason
    }

    /// One supervision step. Issues at most one venue command.
    pub async fn poll(&mut self) -> PollOutcome {
        self.polls += 1;
        let symbol = self.profile.symbol.clone();
        let cfg = &self.ctx.config;

        // ── [1] Position (venue is the source of truth) ──────────────────────
        let venue = self.ctx.venue.clone();
        let read = bounded(&cfg.venue, "get_open_position", |_| {
            let venue = venue.clone();
            let symbol = symbol.clone();
            async move { venue.get_open_position(&symbol).await }
        })
        .await;

        let position = match read {
            Ok(Some(p)) => p,
            Ok(None) => {
                info!(symbol = %symbol, ticket = ?self.state.ticket, "position gone, monitor exits");
                self.state.reset();
                self.publish(None, None);
                return PollOutcome::Exit(ExitReason::PositionGone);
            }
            Err(EngineError::InvariantViolation(detail)) => {
                error!(symbol = %symbol, %detail, "🛑 invariant violation, monitor terminates");
                self.publish(None, Some(detail.clone()));
                return PollOutcome::Exit(ExitReason::InvariantViolation { detail });
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "position read failed, retry next poll");
                self.publish(None, Some(e.to_string()));
                return PollOutcome::Continue;
            }
        };

        if self.state.ticket.is_some() && self.state.ticket != Some(position.ticket) {
            info!(
                symbol = %symbol,
                old    = ?self.state.ticket,
                new    = position.ticket,
                "🔁 new ticket, state reset"
            );
        }
        self.state.observe(&position);

        // ── [2] Signal refresh ───────────────────────────────────────────────
        let every = u64::from(cfg.signal_refresh_polls);
        if every > 0 && (self.polls - 1) % every == 0 {
            self.refresh_signal().await;
        }

        // ── [3] Reversal (takes precedence over any stop change) ─────────────
        match self.check_reversal(&position).await {
            Ok(Some(reason)) => return PollOutcome::Exit(reason),
            Ok(None) => {}
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "close on reversal not confirmed, retry next poll");
                self.publish(Some(&position), Some(e.to_string()));
                return PollOutcome::Continue;
            }
        }

        // ── [4] Breakeven / trailing ─────────────────────────────────────────
        let err = self.protect(&position).await.err().map(|e| e.to_string());
        self.publish(Some(&position), err);
        PollOutcome::Continue
    }

    async fn refresh_signal(&self) {
        let symbol = self.profile.symbol.clone();
        let oracle = self.ctx.oracle.clone();
        let result = bounded(&self.ctx.config.analysis, "analyze", |_| {
            let oracle = oracle.clone();
            let symbol = symbol.clone();
            async move { oracle.analyze(&symbol).await }
        })
        .await;

        match result {
            Ok(signal) => {
                debug!(symbol = %symbol, direction = %signal.direction, confidence = signal.confidence, "signal refreshed");
                self.ctx.signals.put(&symbol, signal).await;
            }
            Err(e) => debug!(symbol = %symbol, error = %e, "signal refresh failed, keeping stored signal"),
        }
    }

    /// `Ok(Some)` = closed, `Ok(None)` = no reversal, `Err` = close not confirmed.
    async fn check_reversal(&mut self, position: &Position) -> Result<Option<ExitReason>, EngineError> {
        let Some(signal) = self.ctx.signals.get(&position.symbol).await else {
            return Ok(None);
        };
        if !position.direction.is_reversed_by(signal.direction)
            || signal.confidence < self.ctx.config.reversal_min_confidence
        {
            return Ok(None);
        }

        warn!(
            symbol     = %position.symbol,
            ticket     = position.ticket,
            position   = %position.direction,
            signal     = %signal.direction,
            confidence = signal.confidence,
            "🔄 reversal detected, closing"
        );

        let venue = self.ctx.venue.clone();
        let ticket = position.ticket;
        bounded(&self.ctx.config.venue, "close", |_| {
            let venue = venue.clone();
            async move { venue.close(ticket).await }
        })
        .await
        .map_err(|e| EngineError::ReversalCloseFailed(e.to_string()))?;

        self.ctx.events.publish(&EngineEvent::ReversalClosed {
            symbol:           position.symbol.clone(),
            ticket,
            position_side:    position.direction,
            signal_direction: signal.direction,
            confidence:       signal.confidence,
        });
        self.state.reset();
        self.publish(None, None);
        Ok(Some(ExitReason::ReversalClosed { ticket }))
    }

    /// At most one phase transition and one stop modification.
    async fn protect(&mut self, position: &Position) -> Result<(), EngineError> {
        let cfg = &self.ctx.config;
        let pnl = position.unrealized_pnl;

        match self.state.phase {
            MonitorPhase::NoSlProtection => {
                if pnl < cfg.breakeven_profit {
                    return Ok(());
                }
                let target = position.breakeven_stop(self.profile.breakeven_buffer());
                if position.improves_stop(target) {
                    self.move_stop(position, target).await?;
                } else {
                    debug!(
                        symbol = %position.symbol,
                        stop   = ?position.current_stop,
                        "stop already beyond breakeven"
                    );
                }
                self.transition(position, MonitorPhase::Protected);
                Ok(())
            }
            MonitorPhase::Protected => {
                if pnl < cfg.trailing_profit {
                    return Ok(());
                }
                self.transition(position, MonitorPhase::Trailing);
                self.trail(position).await
            }
            MonitorPhase::Trailing => self.trail(position).await,
        }
    }

    async fn trail(&mut self, position: &Position) -> Result<(), EngineError> {
        let candidate = position.trailing_stop(self.profile.trail_distance());
        if !position.improves_stop(candidate) {
            return Ok(());
        }
        if let Some(last) = self.state.last_trail_price {
            if (position.current_price - last).abs() < self.profile.trail_step() {
                debug!(symbol = %position.symbol, price = position.current_price, last, "below trail step");
                return Ok(());
            }
        }
        self.move_stop(position, candidate).await
    }

    async fn move_stop(&mut self, position: &Position, new_stop: f64) -> Result<(), EngineError> {
        let venue = self.ctx.venue.clone();
        let ticket = position.ticket;
        let result = bounded(&self.ctx.config.venue, "modify_stop", |_| {
            let venue = venue.clone();
            async move { venue.modify_stop(ticket, new_stop).await }
        })
        .await;

        match result {
            Ok(()) => {
                info!(
                    symbol = %position.symbol,
                    ticket,
                    from   = ?position.current_stop,
                    to     = new_stop,
                    phase  = %self.state.phase,
                    "🛡️ stop moved"
                );
                self.state.last_known_stop = Some(new_stop);
                self.state.last_trail_price = Some(position.current_price);
                self.ctx.events.publish(&EngineEvent::StopMoved {
                    symbol: position.symbol.clone(),
                    ticket,
                    from:   position.current_stop,
                    to:     new_stop,
                    phase:  self.state.phase,
                });
                Ok(())
            }
            Err(e) => {
                warn!(symbol = %position.symbol, ticket, new_stop, error = %e, "stop modification failed, retry next poll");
                Err(e)
            }
        }
    }

    fn transition(&mut self, position: &Position, to: MonitorPhase) {
        let from = self.state.phase;
        if self.state.advance(to) {
            info!(symbol = %position.symbol, ticket = position.ticket, %from, %to, pnl = position.unrealized_pnl, "phase change");
            self.ctx.events.publish(&EngineEvent::PhaseChanged {
                symbol: position.symbol.clone(),
                ticket: position.ticket,
                from,
                to,
            });
        }
    }

    fn publish(&self, position: Option<&Position>, last_error: Option<String>) {
        let snapshot = MonitorSnapshot {
            symbol:         self.profile.symbol.clone(),
            generation:     self.generation,
            state:          self.state.clone(),
            unrealized_pnl: position.map(|p| p.unrealized_pnl),
            current_price:  position.map(|p| p.current_price),
            polls:          self.polls,
            last_error,
            updated_at:     Utc::now(),
        };
        self.snapshot.send_replace(snapshot);
    }
}
