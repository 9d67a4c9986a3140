//! # events
//!
//! Defines [`EngineEvent`] — ทุก Event ที่ Engine Broadcast ออกไปผ่าน
//! WebSocket (`/ws/monitor`) ให้ Dashboard เห็นแบบ Real-time
//!
//! [`EventBus`] ห่อ `tokio::sync::broadcast::Sender<String>` โดยแปลง Event
//! เป็น JSON String ก่อนส่ง เพื่อหลีกเลี่ยง Clone constraints ที่ซับซ้อน

use serde::Serialize;
use tokio::sync::broadcast;

use crate::engine::report::StatusLine;
use crate::models::{Direction, MonitorPhase, Ticket};

/// Event ทุกรูปแบบที่ Dashboard จะได้รับ
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    /// ผลการตัดสินใจของ Scheduler ต่อ 1 instrument ใน 1 cycle
    CycleStatus {
        line: Box<StatusLine>,
    },

    /// Venue ยืนยัน Order แล้ว
    PositionOpened {
        symbol:    String,
        ticket:    Ticket,
        direction: Direction,
        stop:      Option<f64>,
        target:    Option<f64>,
        policy:    String,
    },

    /// Monitor ขยับ SL (breakeven หรือ trailing)
    StopMoved {
        symbol: String,
        ticket: Ticket,
        from:   Option<f64>,
        to:     f64,
        phase:  MonitorPhase,
    },

    PhaseChanged {
        symbol: String,
        ticket: Ticket,
        from:   MonitorPhase,
        to:     MonitorPhase,
    },

    /// Signal กลับทิศ → ปิด Position แล้ว
    ReversalClosed {
        symbol:           String,
        ticket:           Ticket,
        position_side:    Direction,
        signal_direction: Direction,
        confidence:       f64,
    },

    MonitorStarted {
        symbol:     String,
        generation: u64,
    },

    MonitorStopped {
        symbol: String,
        reason: String,
    },

    /// Risk Kill Switch ถูกเปิด (ไม่ว่าจาก Auto-Kill หรือ Manual)
    RiskKilled {
        reason: String,
    },
}

impl EngineEvent {
    /// แปลงเป็น JSON String สำหรับส่งผ่าน WebSocket
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}

// ─── EventBus ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// ไม่ panic ถ้าไม่มี listener (ปลอดภัยสำหรับ headless mode)
    pub fn publish(&self, event: &EngineEvent) {
        // Err = ไม่มี receiver ไม่ใช่ error จริงๆ
        let _ = self.tx.send(event.to_json());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
