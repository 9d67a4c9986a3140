//! # risk — Risk Gate
//!
//! ชั้นกั้นสุดท้ายก่อน Scheduler ยิง `open` — ป้องกันพอร์ตล้าง
//!
//! ## ชั้นการป้องกัน
//! 1. **Kill Switch**       — หยุดเปิด Position ใหม่ (manual หรือ auto); Monitor ยังทำงานต่อ
//! 2. **Cooldown**          — พักหลัง open fail ก่อนลองใหม่
//! 3. **Max Trades/Day**    — จำกัดจำนวน open ต่อวัน (UTC)
//! 4. **Auto-Kill**         — หยุดอัตโนมัติเมื่อ open fail ติดต่อกัน N ครั้ง

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::events::{EngineEvent, EventBus};

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RiskConfig {
    /// จำนวน open สูงสุดต่อวัน (0 = ไม่จำกัด)
    pub max_trades_per_day:          u32,
    /// Fail ติดต่อกันกี่ครั้งถึง Auto-Kill (0 = ไม่ Auto-Kill)
    pub max_consecutive_failures:    u32,
    /// พักหลังจาก Fail กี่วินาที
    pub cooldown_secs_after_failure: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_trades_per_day:          20,
            max_consecutive_failures:    3,
            cooldown_secs_after_failure: 300,
        }
    }
}

// ─── Internal State ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct GateState {
    is_killed:            bool,
    kill_reason:          Option<String>,
    trades_today:         u32,
    consecutive_failures: u32,
    last_failure_at:      Option<DateTime<Utc>>,
    last_trade_at:        Option<DateTime<Utc>>,
    daily_reset_date:     NaiveDate,
}

// ─── Status (for Dashboard / API) ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub is_killed:            bool,
    pub kill_reason:          Option<String>,
    pub trades_today:         u32,
    pub consecutive_failures: u32,
    pub last_trade_at:        Option<DateTime<Utc>>,
    pub in_cooldown:          bool,
    pub cooldown_ends_at:     Option<DateTime<Utc>>,
    pub config:               RiskConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved,
    Blocked(String),
}

// ─── Risk Gate ────────────────────────────────────────────────────────────────

pub struct RiskGate {
    state:  RwLock<GateState>,
    config: RiskConfig,
    events: EventBus,
}

impl RiskGate {
    pub fn new(config: RiskConfig, events: EventBus) -> Self {
        Self {
            state: RwLock::new(GateState {
                is_killed:            false,
                kill_reason:          None,
                trades_today:         0,
                consecutive_failures: 0,
                last_failure_at:      None,
                last_trade_at:        None,
                daily_reset_date:     Utc::now().date_naive(),
            }),
            config,
            events,
        }
    }

    // ─── Pre-Trade Check (เรียกก่อน open ทุกครั้ง) ────────────────────────────

    pub async fn pre_trade_check(&self) -> RiskDecision {
        self.pre_trade_check_at(Utc::now()).await
    }

    pub async fn pre_trade_check_at(&self, now: DateTime<Utc>) -> RiskDecision {
        let mut st = self.state.write().await;

        // Daily reset
        let today = now.date_naive();
        if today > st.daily_reset_date {
            st.trades_today     = 0;
            st.daily_reset_date = today;
            info!("📅 Risk: daily counters reset");
        }

        // [1] Kill switch
        if st.is_killed {
            return RiskDecision::Blocked(format!(
                "kill switch active: {}",
                st.kill_reason.as_deref().unwrap_or("manual activation")
            ));
        }

        // [2] Cooldown หลัง Fail
        if let Some(fail_time) = st.last_failure_at {
            let elapsed  = now.signed_duration_since(fail_time);
            let cooldown = chrono::Duration::seconds(self.config.cooldown_secs_after_failure as i64);
            if elapsed < cooldown {
                let remaining = (cooldown - elapsed).num_seconds();
                return RiskDecision::Blocked(format!("cooldown: {remaining}s remaining after last failure"));
            }
        }

        // [3] Max trades per day
        if self.config.max_trades_per_day > 0 && st.trades_today >= self.config.max_trades_per_day {
            return RiskDecision::Blocked(format!(
                "daily trade limit reached: {}/{}",
                st.trades_today, self.config.max_trades_per_day
            ));
        }

        // [4] Consecutive failure auto-kill
        if self.config.max_consecutive_failures > 0
            && st.consecutive_failures >= self.config.max_consecutive_failures
        {
            let reason = format!("auto-kill: {} consecutive open failures", st.consecutive_failures);
            st.is_killed   = true;
            st.kill_reason = Some(reason.clone());
            warn!("⛔ Risk auto-kill activated: {reason}");
            self.events.publish(&EngineEvent::RiskKilled { reason: reason.clone() });
            return RiskDecision::Blocked(reason);
        }

        st.trades_today += 1;
        st.last_trade_at = Some(now);
        info!(
            trades_today = st.trades_today,
            max          = self.config.max_trades_per_day,
            "✅ Risk approved"
        );

        RiskDecision::Approved
    }

    // ─── Result Recording ─────────────────────────────────────────────────────

    /// Venue ยืนยัน open สำเร็จ
    pub async fn record_success(&self) {
        let mut st = self.state.write().await;
        let prev = st.consecutive_failures;
        st.consecutive_failures = 0;
        if prev > 0 {
            info!("Risk: consecutive_failures reset (was {prev})");
        }
    }

    /// open ล้มเหลวหลังหมด retry
    pub async fn record_failure(&self) {
        self.record_failure_at(Utc::now()).await
    }

    pub async fn record_failure_at(&self, now: DateTime<Utc>) {
        let mut st = self.state.write().await;
        st.consecutive_failures += 1;
        st.last_failure_at = Some(now);
        warn!(
            consecutive = st.consecutive_failures,
            max         = self.config.max_consecutive_failures,
            "⚠️ Risk: open failure recorded"
        );
    }

    // ─── Manual Controls ─────────────────────────────────────────────────────

    pub async fn kill(&self, reason: &str) {
        let mut st = self.state.write().await;
        st.is_killed   = true;
        st.kill_reason = Some(reason.to_string());
        warn!(reason, "⛔ KILL SWITCH ACTIVATED");
        self.events.publish(&EngineEvent::RiskKilled { reason: reason.to_string() });
    }

    /// เปิดระบบอีกครั้ง (หลังแก้ไขปัญหาแล้ว)
    pub async fn rearm(&self) {
        let mut st = self.state.write().await;
        st.is_killed            = false;
        st.kill_reason          = None;
        st.consecutive_failures = 0;
        st.last_failure_at      = None;
        info!("✅ KILL SWITCH DEACTIVATED, system re-armed");
    }

    // ─── Status ───────────────────────────────────────────────────────────────

    pub async fn status(&self) -> RiskStatus {
        let st = self.state.read().await;
        let cooldown_ends = st
            .last_failure_at
            .map(|t| t + chrono::Duration::seconds(self.config.cooldown_secs_after_failure as i64));
        let in_cooldown = cooldown_ends.map(|end| Utc::now() < end).unwrap_or(false);

        RiskStatus {
            is_killed:            st.is_killed,
            kill_reason:          st.kill_reason.clone(),
            trades_today:         st.trades_today,
            consecutive_failures: st.consecutive_failures,
            last_trade_at:        st.last_trade_at,
            in_cooldown,
            cooldown_ends_at:     if in_cooldown { cooldown_ends } else { None },
            config:               self.config.clone(),
        }
    }
}
