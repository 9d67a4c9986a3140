//! # engine::supervisor
//!
//! **Monitor Supervisor** — รับประกันว่ามี PositionMonitor ได้ไม่เกิน 1 ตัวต่อ instrument
//!
//! Registry `symbol → MonitorHandle` อยู่หลัง `tokio::sync::Mutex` ตัวเดียว
//! ทุก start/stop/exit ต้องผ่าน lock นี้ จึงไม่มี race ระหว่าง start พร้อมกัน
//!
//! - `start` — no-op ถ้ามีตัวที่ยังไม่จบอยู่แล้ว
//! - monitor ที่จบเอง ลบ entry ของตัวเอง (เช็ค generation ก่อน)
//! - `stop` — cancel แล้วรอภายใน grace period; เกินเวลา → abort + warn

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::monitor::{ExitReason, MonitorContext, MonitorSnapshot, PositionMonitor};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::models::InstrumentProfile;

struct MonitorHandle {
    generation: u64,
    cancel:     CancellationToken,
    join:       JoinHandle<ExitReason>,
    snapshot:   watch::Receiver<MonitorSnapshot>,
    /// Closes once the task has fully finished, deregistration included.
    done:       watch::Receiver<()>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StopReport {
    /// Exited within the grace period.
    pub stopped:   Vec<String>,
    /// Did not exit in time; aborted.
    pub abandoned: Vec<String>,
}

struct Inner {
    registry:        Mutex<HashMap<String, MonitorHandle>>,
    next_generation: AtomicU64,
    profiles:        HashMap<String, Arc<InstrumentProfile>>,
    ctx:             Arc<MonitorContext>,
    root:            CancellationToken,
    grace:           Duration,
}

#[derive(Clone)]
pub struct MonitorSupervisor {
    inner: Arc<Inner>,
}

impl MonitorSupervisor {
    pub fn new(
        profiles: impl IntoIterator<Item = Arc<InstrumentProfile>>,
        ctx: Arc<MonitorContext>,
        root: CancellationToken,
        grace: Duration,
    ) -> Self {
        let profiles = profiles.into_iter().map(|p| (p.symbol.clone(), p)).collect();
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                profiles,
                ctx,
                root,
                grace,
            }),
        }
    }

    /// Spawn a monitor for `symbol` unless one is already running.
    /// `Ok(true)` = spawned, `Ok(false)` = already running or shutting down.
    pub async fn start(&self, symbol: &str) -> Result<bool, EngineError> {
        let profile = self
            .inner
            .profiles
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::InvariantViolation(format!("no instrument profile for {symbol}")))?;

        let mut registry = self.inner.registry.lock().await;
        if self.inner.root.is_cancelled() {
            return Ok(false);
        }
        if let Some(h) = registry.get(symbol) {
            if !h.join.is_finished() {
                return Ok(false);
            }
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.root.child_token();
        let (monitor, snapshot) = PositionMonitor::new(profile, self.inner.ctx.clone(), generation);

        let (done_tx, done) = watch::channel(());
        let inner = self.inner.clone();
        let token = cancel.clone();
        let sym = symbol.to_string();
        let join = tokio::spawn(async move {
            let _done = done_tx;
            let reason = monitor.run(token).await;
            inner.on_exit(&sym, generation, &reason).await;
            reason
        });

        registry.insert(symbol.to_string(), MonitorHandle { generation, cancel, join, snapshot, done });
        self.inner.ctx.events.publish(&EngineEvent::MonitorStarted { symbol: symbol.to_string(), generation });
        info!(symbol, generation, "▶️ monitor spawned");
        Ok(true)
    }

    /// Cancel the monitor for `symbol`, or every monitor when `None`, and wait
    /// up to the grace period for them to exit.
    pub async fn stop(&self, symbol: Option<&str>) -> StopReport {
        let targets: Vec<(String, u64, watch::Receiver<()>, tokio::task::AbortHandle)> = {
            let registry = self.inner.registry.lock().await;
            registry
                .iter()
                .filter(|(sym, _)| symbol.map_or(true, |s| s == sym.as_str()))
                .map(|(sym, h)| {
                    h.cancel.cancel();
                    (sym.clone(), h.generation, h.done.clone(), h.join.abort_handle())
                })
                .collect()
        };

        let deadline = tokio::time::Instant::now() + self.inner.grace;
        let mut report = StopReport::default();

        for (sym, generation, mut rx, abort) in targets {
            let exited = tokio::time::timeout_at(deadline, async {
                while rx.changed().await.is_ok() {}
            })
            .await
            .is_ok();

            if exited {
                report.stopped.push(sym);
            } else {
                warn!(symbol = %sym, grace_ms = self.inner.grace.as_millis() as u64, "⚠️ monitor did not exit in time, abandoning");
                abort.abort();
                self.inner
                    .on_exit(&sym, generation, &ExitReason::Cancelled)
                    .await;
                report.abandoned.push(sym);
            }
        }
        report
    }

    pub async fn is_running(&self, symbol: &str) -> bool {
        self.inner
            .registry
            .lock()
            .await
            .get(symbol)
            .map(|h| !h.join.is_finished())
            .unwrap_or(false)
    }

    pub async fn running(&self) -> Vec<String> {
        let registry = self.inner.registry.lock().await;
        let mut out: Vec<String> = registry
            .iter()
            .filter(|(_, h)| !h.join.is_finished())
            .map(|(s, _)| s.clone())
            .collect();
        out.sort();
        out
    }

    pub async fn snapshot(&self, symbol: &str) -> Option<MonitorSnapshot> {
        self.inner.registry.lock().await.get(symbol).map(|h| h.snapshot.borrow().clone())
    }

    pub async fn snapshots(&self) -> Vec<MonitorSnapshot> {
        let registry = self.inner.registry.lock().await;
        let mut out: Vec<MonitorSnapshot> = registry.values().map(|h| h.snapshot.borrow().clone()).collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }
}

impl Inner {
    /// Deregister and announce under the registry lock, so a `MonitorStarted`
    /// for the same symbol can never be observed before this `MonitorStopped`.
    async fn on_exit(&self, symbol: &str, generation: u64, reason: &ExitReason) {
        let mut registry = self.registry.lock().await;
        if registry.get(symbol).map(|h| h.generation) != Some(generation) {
            return;
        }
        registry.remove(symbol);
        self.ctx.events.publish(&EngineEvent::MonitorStopped {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::monitor::MonitorConfig;
    use crate::engine::retry::CallPolicy;
    use crate::engine::signal_store::SignalStore;
    use crate::events::EventBus;
    use crate::gateway::oracle::NoTradeOracle;
    use crate::gateway::paper::PaperVenue;
    use crate::gateway::{ExecutionGateway, OpenOrder};
    use crate::models::{Direction, Position, RiskPolicy, Ticket};
    use async_trait::async_trait;

    fn make_config() -> MonitorConfig {
        let call = CallPolicy { timeout: Duration::from_secs(5), retries: 0, backoff: Duration::ZERO };
        MonitorConfig {
            poll_interval:           Duration::from_secs(30),
            signal_refresh_polls:    0,
            breakeven_profit:        50.0,
            trailing_profit:         60.0,
            reversal_min_confidence: 78.0,
            venue:                   call,
            analysis:                call,
        }
    }

    fn make_supervisor(venue: Arc<dyn ExecutionGateway>, grace: Duration) -> MonitorSupervisor {
        let ctx = Arc::new(MonitorContext {
            venue,
            oracle: Arc::new(NoTradeOracle),
            signals: SignalStore::new(),
            events: EventBus::default(),
            config: make_config(),
        });
        let policy = RiskPolicy::FixedPips { sl_pips: 240.0, tp_pips: 70.0 };
        MonitorSupervisor::new(
            [
                Arc::new(InstrumentProfile::btcusd(policy)),
                Arc::new(InstrumentProfile::xauusd(policy)),
            ],
            ctx,
            CancellationToken::new(),
            grace,
        )
    }

    async fn make_venue() -> Arc<PaperVenue> {
        let venue = Arc::new(PaperVenue::new());
        venue.set_price("BTCUSD", 50_000.0).await;
        venue.set_price("XAUUSD", 2_350.0).await;
        venue.inject_position("BTCUSD", Direction::Buy, 50_000.0, 1.0).await;
        venue.inject_position("XAUUSD", Direction::Sell, 2_350.0, 1.0).await;
        venue
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_spawn_one_monitor() {
        let sup = make_supervisor(make_venue().await, Duration::from_secs(5));

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let sup = sup.clone();
            tasks.push(tokio::spawn(async move { sup.start("BTCUSD").await.unwrap() }));
        }
        let mut spawned = 0;
        for t in tasks {
            if t.await.unwrap() {
                spawned += 1;
            }
        }
        assert_eq!(spawned, 1);
        assert_eq!(sup.running().await, vec!["BTCUSD".to_string()]);

        let report = sup.stop(None).await;
        assert_eq!(report.stopped, vec!["BTCUSD".to_string()]);
        assert!(sup.running().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interleaved_start_stop_never_doubles() {
        let sup = make_supervisor(make_venue().await, Duration::from_secs(5));
        let mut rx = sup.inner.ctx.events.subscribe();

        let mut tasks = Vec::new();
        for i in 0..40 {
            let sup = sup.clone();
            tasks.push(tokio::spawn(async move {
                if i % 3 == 0 {
                    sup.stop(Some("XAUUSD")).await;
                } else {
                    sup.start("XAUUSD").await.unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        sup.stop(None).await;

        // replay lifecycle events: never two live monitors, all gone at the end
        let mut live = 0i32;
        while let Ok(msg) = rx.try_recv() {
            if msg.contains("MONITOR_STARTED") {
                live += 1;
            } else if msg.contains("MONITOR_STOPPED") {
                live -= 1;
            }
            assert!((0..=1).contains(&live), "live monitors = {live}");
        }
        assert_eq!(live, 0);
    }

    #[tokio::test]
    async fn test_stop_one_leaves_the_other() {
        let sup = make_supervisor(make_venue().await, Duration::from_secs(5));
        assert!(sup.start("BTCUSD").await.unwrap());
        assert!(sup.start("XAUUSD").await.unwrap());

        let report = sup.stop(Some("BTCUSD")).await;
        assert_eq!(report.stopped, vec!["BTCUSD".to_string()]);
        assert!(!sup.is_running("BTCUSD").await);
        assert!(sup.is_running("XAUUSD").await);

        // restart after stop is allowed
        assert!(sup.start("BTCUSD").await.unwrap());
        sup.stop(None).await;
    }

    #[tokio::test]
    async fn test_monitor_deregisters_when_position_closes() {
        let venue = Arc::new(PaperVenue::new());
        venue.set_price("BTCUSD", 50_000.0).await;
        let sup = make_supervisor(venue.clone(), Duration::from_secs(5));

        // no position → first poll exits
        assert!(sup.start("BTCUSD").await.unwrap());
        for _ in 0..100 {
            if !sup.is_running("BTCUSD").await && sup.snapshot("BTCUSD").await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sup.snapshot("BTCUSD").await.is_none());
        assert!(sup.start("BTCUSD").await.unwrap());
        sup.stop(None).await;
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_rejected() {
        let sup = make_supervisor(make_venue().await, Duration::from_secs(1));
        assert!(sup.start("EURUSD").await.is_err());
    }

    /// A venue whose position read never returns.
    struct HangingVenue;

    #[async_trait]
    impl ExecutionGateway for HangingVenue {
        async fn get_open_position(&self, _: &str) -> Result<Option<Position>, EngineError> {
            std::future::pending().await
        }
        async fn open_positions_total(&self) -> Result<usize, EngineError> {
            Ok(0)
        }
        async fn open(&self, _: &OpenOrder) -> Result<Position, EngineError> {
            Err(EngineError::VenueRejected("hanging venue".into()))
        }
        async fn modify_stop(&self, _: Ticket, _: f64) -> Result<(), EngineError> {
            Ok(())
        }
        async fn close(&self, _: Ticket) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_monitor_is_abandoned_after_grace() {
        let sup = make_supervisor(Arc::new(HangingVenue), Duration::from_secs(2));
        assert!(sup.start("BTCUSD").await.unwrap());
        tokio::task::yield_now().await;

        let report = sup.stop(None).await;
        assert_eq!(report.abandoned, vec!["BTCUSD".to_string()]);
        assert!(report.stopped.is_empty());
        assert!(!sup.is_running("BTCUSD").await);
    }
}
