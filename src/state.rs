//! # state
//!
//! AppState ที่ inject เข้าทุก Axum handler เป็นแค่ handle ไปยัง component
//! ของ engine ที่ทำงานอยู่แล้ว (Scheduler / Supervisor) ไม่มี state ของตัวเอง
//! นอกจากเวลาที่ process เริ่ม

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::engine::{Journal, MonitorSupervisor, SignalStore};
use crate::events::EventBus;
use crate::risk::RiskGate;

// ─── AppState ─────────────────────────────────────────────────────────────────

/// Top-level shared state injected into every Axum handler.
pub struct AppState {
    // ── Engine ────────────────────────────────────────────────────────────────
    /// Signal ล่าสุดต่อ instrument (Scheduler + Monitor เขียน)
    pub signals:    SignalStore,
    /// Monitor ที่กำลังดูแล Position อยู่
    pub supervisor: MonitorSupervisor,
    /// Status line ล่าสุดต่อ instrument + history ในหน่วยความจำ
    pub journal:    Arc<Journal>,

    // ── Risk Management ───────────────────────────────────────────────────────
    pub risk: Arc<RiskGate>,

    // ── Monitor / WebSocket ───────────────────────────────────────────────────
    /// EngineEvent (pre-serialized JSON) สำหรับ WebSocket clients
    pub events: EventBus,

    /// Instrument ตามลำดับที่ประกาศ
    pub instruments: Vec<String>,
    pub started_at:  DateTime<Utc>,
}

impl AppState {
    pub fn new(
        signals: SignalStore,
        supervisor: MonitorSupervisor,
        journal: Arc<Journal>,
        risk: Arc<RiskGate>,
        events: EventBus,
        instruments: Vec<String>,
    ) -> Self {
        Self {
            signals,
            supervisor,
            journal,
            risk,
            events,
            instruments,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

/// Convenience type alias
pub type SharedState = Arc<AppState>;
