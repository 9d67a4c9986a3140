//! # gateway::paper
//!
//! **Paper Venue** — ตลาดจำลองในหน่วยความจำ ใช้ตอน `MT5_BASE_URL=mock`
//! และเป็น test double ของทุก test ใน engine
//!
//! - Mark-to-market ทุกครั้งที่ราคาเปลี่ยน: `pnl = side × (exit − open) × volume × contract`
//! - SL ที่อยู่ผิดฝั่งราคาถูกปฏิเสธเหมือน MT5 (retcode 10016 Invalid stops)
//! - Fault injection: บังคับให้ call ถัดไป fail แบบ transient / rejected

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::gateway::{ExecutionGateway, MarketFeed, OpenOrder, Quote};
use crate::guards::StructuralCheck;
use crate::models::{Direction, Position, Ticket};

/// What the next N calls of a kind should do instead of succeeding.
#[cfg_attr(not(test), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `get_open_position` / `open_positions_total` time out.
    ReadTimeout,
    /// `open` times out before reaching the venue.
    OpenTimeout,
    /// `open` fills, but the confirmation is lost (reported as a timeout).
    OpenLostConfirmation,
    /// `open` rejected (retcode != 10009).
    OpenRejected,
    ModifyTimeout,
    CloseTimeout,
}

/// Every mutating call, in arrival order.
#[cfg_attr(not(test), allow(dead_code))]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum VenueCall {
    Open { symbol: String, direction: Direction },
    Modify { ticket: Ticket, stop: f64 },
    Close { ticket: Ticket },
}

#[derive(Default)]
struct Book {
    positions:     Vec<Position>,
    quotes:        HashMap<String, Quote>,
    atr:           HashMap<String, f64>,
    contract_size: HashMap<String, f64>,
    failing:       HashMap<String, Vec<String>>,
    faults:        HashMap<Fault, u32>,
    #[cfg_attr(not(test), allow(dead_code))]
    calls:         Vec<VenueCall>,
    next_ticket:   Ticket,
}

impl Book {
    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.get_mut(&fault) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn mark(&mut self, symbol: &str) {
        let Some(quote) = self.quotes.get(symbol).copied() else { return };
        let contract = self.contract_size.get(symbol).copied().unwrap_or(1.0);
        for p in self.positions.iter_mut().filter(|p| p.symbol == symbol) {
            p.current_price  = quote.exit_for(p.direction);
            p.unrealized_pnl = p.direction.sign() * (p.current_price - p.open_price) * p.volume * contract;
        }
    }

    fn create(&mut self, symbol: &str, direction: Direction, open_price: f64, volume: f64) -> Ticket {
        self.next_ticket += 1;
        let ticket = 100_000 + self.next_ticket;
        self.positions.push(Position {
            symbol: symbol.to_string(),
            ticket,
            direction,
            volume,
            open_price,
            current_price: open_price,
            current_stop: None,
            current_target: None,
            opened_at: Utc::now(),
            unrealized_pnl: 0.0,
        });
        self.mark(symbol);
        ticket
    }
}

fn timeout(op: &str) -> EngineError {
    EngineError::TransientVenue(format!("paper venue: {op} timed out"))
}

// ─── PaperVenue ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct PaperVenue {
    book: Mutex<Book>,
}

impl PaperVenue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock-mode venue with plausible quotes for the built-in instruments.
    pub async fn seeded() -> Self {
        let venue = Self::new();
        venue.set_quote("BTCUSD", 65_000.0, 65_010.0).await;
        venue.set_quote("XAUUSD", 2_350.00, 2_350.30).await;
        venue.set_atr("BTCUSD", 180.0).await;
        venue.set_atr("XAUUSD", 1.2).await;
        venue.set_contract_size("XAUUSD", 100.0).await;
        venue
    }

    // ── Market control ───────────────────────────────────────────────────────

    pub async fn set_quote(&self, symbol: &str, bid: f64, ask: f64) {
        let mut book = self.book.lock().await;
        book.quotes.insert(symbol.to_string(), Quote { bid, ask });
        book.mark(symbol);
    }

    /// Zero-spread quote.
    #[cfg(test)]
    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.set_quote(symbol, price, price).await;
    }

    pub async fn set_atr(&self, symbol: &str, atr: f64) {
        self.book.lock().await.atr.insert(symbol.to_string(), atr);
    }

    pub async fn set_contract_size(&self, symbol: &str, size: f64) {
        let mut book = self.book.lock().await;
        book.contract_size.insert(symbol.to_string(), size);
        book.mark(symbol);
    }

    /// Random walk step of at most `max_step` (mock mode ticker).
    pub async fn jitter(&self, symbol: &str, max_step: f64) {
        let step = rand::thread_rng().gen_range(-max_step..=max_step);
        let mut book = self.book.lock().await;
        if let Some(q) = book.quotes.get_mut(symbol) {
            q.bid += step;
            q.ask += step;
        }
        book.mark(symbol);
    }

    // ── Position control ─────────────────────────────────────────────────────

    /// A position opened outside the engine (another terminal, a restart).
    #[cfg(test)]
    pub async fn inject_position(&self, symbol: &str, direction: Direction, open_price: f64, volume: f64) -> Ticket {
        self.book.lock().await.create(symbol, direction, open_price, volume)
    }

    /// Stop-out / manual close on the venue side.
    #[cfg(test)]
    pub async fn close_externally(&self, ticket: Ticket) -> bool {
        let mut book = self.book.lock().await;
        let before = book.positions.len();
        book.positions.retain(|p| p.ticket != ticket);
        book.positions.len() != before
    }

    #[cfg(test)]
    pub async fn set_stop(&self, ticket: Ticket, stop: Option<f64>) {
        let mut book = self.book.lock().await;
        if let Some(p) = book.positions.iter_mut().find(|p| p.ticket == ticket) {
            p.current_stop = stop;
        }
    }

    #[cfg(test)]
    pub async fn positions(&self) -> Vec<Position> {
        self.book.lock().await.positions.clone()
    }

    #[cfg(test)]
    pub async fn position(&self, ticket: Ticket) -> Option<Position> {
        self.book.lock().await.positions.iter().find(|p| p.ticket == ticket).cloned()
    }

    // ── Test hooks ───────────────────────────────────────────────────────────

    #[cfg(test)]
    pub async fn fail_next(&self, fault: Fault, times: u32) {
        *self.book.lock().await.faults.entry(fault).or_default() += times;
    }

    #[cfg(test)]
    pub async fn set_structural_failures(&self, symbol: &str, reasons: Vec<String>) {
        self.book.lock().await.failing.insert(symbol.to_string(), reasons);
    }

    #[cfg(test)]
    pub async fn calls(&self) -> Vec<VenueCall> {
        self.book.lock().await.calls.clone()
    }
}

// ─── ExecutionGateway ─────────────────────────────────────────────────────────

#[async_trait]
impl ExecutionGateway for PaperVenue {
    async fn get_open_position(&self, symbol: &str) -> Result<Option<Position>, EngineError> {
        let mut book = self.book.lock().await;
        if book.take_fault(Fault::ReadTimeout) {
            return Err(timeout("positions_get"));
        }
        let mut open = book.positions.iter().filter(|p| p.symbol == symbol);
        let first = open.next().cloned();
        if open.next().is_some() {
            return Err(EngineError::InvariantViolation(format!(
                "{symbol}: more than one open position at the venue"
            )));
        }
        Ok(first)
    }

    async fn open_positions_total(&self) -> Result<usize, EngineError> {
        let mut book = self.book.lock().await;
        if book.take_fault(Fault::ReadTimeout) {
            return Err(timeout("positions_total"));
        }
        Ok(book.positions.len())
    }

    async fn open(&self, order: &OpenOrder) -> Result<Position, EngineError> {
        let mut book = self.book.lock().await;
        book.calls.push(VenueCall::Open { symbol: order.symbol.clone(), direction: order.direction });

        if book.take_fault(Fault::OpenTimeout) {
            return Err(timeout("order_send"));
        }
        if book.take_fault(Fault::OpenRejected) {
            return Err(EngineError::VenueRejected("retcode=10019 No money".into()));
        }
        if !order.direction.is_actionable() {
            return Err(EngineError::VenueRejected("retcode=10013 Invalid request".into()));
        }
        let quote = book
            .quotes
            .get(&order.symbol)
            .copied()
            .ok_or_else(|| EngineError::VenueRejected(format!("retcode=10021 no quote for {}", order.symbol)))?;

        let entry = quote.entry_for(order.direction);
        let (stop, target) = order.levels_at(entry);
        let ticket = book.create(&order.symbol, order.direction, entry, order.volume);
        let lost = book.take_fault(Fault::OpenLostConfirmation);

        let position = book
            .positions
            .iter_mut()
            .find(|p| p.ticket == ticket)
            .map(|p| {
                p.current_stop   = Some(stop);
                p.current_target = Some(target);
                p.clone()
            })
            .ok_or_else(|| EngineError::Internal(anyhow::anyhow!("paper position {ticket} vanished")))?;

        if lost {
            return Err(timeout("order_send confirmation"));
        }
        info!(symbol = %order.symbol, ticket, direction = %order.direction, entry, "📝 [PAPER] order filled");
        Ok(position)
    }

    async fn modify_stop(&self, ticket: Ticket, new_stop: f64) -> Result<(), EngineError> {
        let mut book = self.book.lock().await;
        book.calls.push(VenueCall::Modify { ticket, stop: new_stop });

        if book.take_fault(Fault::ModifyTimeout) {
            return Err(timeout("order_modify"));
        }
        let p = book
            .positions
            .iter_mut()
            .find(|p| p.ticket == ticket)
            .ok_or_else(|| EngineError::VenueRejected(format!("retcode=10036 position #{ticket} not found")))?;

        let wrong_side = match p.direction {
            Direction::Buy => new_stop >= p.current_price,
            Direction::Sell => new_stop <= p.current_price,
            Direction::NoTrade => true,
        };
        if wrong_side {
            return Err(EngineError::VenueRejected(format!(
                "retcode=10016 Invalid stops ({new_stop} vs price {})",
                p.current_price
            )));
        }
        p.current_stop = Some(new_stop);
        debug!(ticket, new_stop, "[PAPER] stop modified");
        Ok(())
    }

    async fn close(&self, ticket: Ticket) -> Result<(), EngineError> {
        let mut book = self.book.lock().await;
        book.calls.push(VenueCall::Close { ticket });

        if book.take_fault(Fault::CloseTimeout) {
            return Err(timeout("order_close"));
        }
        let before = book.positions.len();
        book.positions.retain(|p| p.ticket != ticket);
        if book.positions.len() == before {
            return Err(EngineError::VenueRejected(format!("retcode=10036 position #{ticket} not found")));
        }
        info!(ticket, "📝 [PAPER] position closed");
        Ok(())
    }
}

// ─── MarketFeed ───────────────────────────────────────────────────────────────

#[async_trait]
impl MarketFeed for PaperVenue {
    async fn current_price(&self, symbol: &str) -> Result<Quote, EngineError> {
        self.book
            .lock()
            .await
            .quotes
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::VenueRejected(format!("no quote for {symbol}")))
    }

    async fn current_atr(&self, symbol: &str, _period: u32) -> Result<f64, EngineError> {
        self.book
            .lock()
            .await
            .atr
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::VenueRejected(format!("no ATR for {symbol}")))
    }
}

#[async_trait]
impl StructuralCheck for PaperVenue {
    async fn check(&self, symbol: &str) -> (bool, Vec<String>) {
        match self.book.lock().await.failing.get(symbol) {
            Some(reasons) if !reasons.is_empty() => (false, reasons.clone()),
            _ => (true, Vec::new()),
        }
    }
}
