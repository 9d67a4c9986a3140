//! # engine::scheduler
//!
//! **Scheduler** — รอบหลักของระบบ วนทุก instrument ตามลำดับที่ประกาศไว้
//!
//! ```text
//! for symbol in instruments (fixed order):
//!     position at venue?
//!       ├─ yes → supervisor.start (no-op if running) → status "monitored"
//!       └─ no  → global cap reached? → skip (no open for the rest of this cycle)
//!                hours → news → structural filters
//!                analyze (time-bounded) → direction / confidence threshold
//!                ATR (if policy needs it) → transform → risk gate
//!                open (bounded retry, re-check position before each retry)
//!                  └─ ok → supervisor.start + SignalStore.put
//! sleep random [min, max]
//! ```
//!
//! ความล้มเหลวของ instrument หนึ่งจบแค่ที่ instrument นั้น ไม่ลามไปตัวถัดไป

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::report::{Decision, Journal, SkipReason, StatusLine};
use crate::engine::retry::{bounded, CallPolicy};
use crate::engine::signal_store::SignalStore;
use crate::engine::supervisor::MonitorSupervisor;
use crate::engine::transform::transform;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::gateway::{ExecutionGateway, MarketFeed, OpenOrder, Preconditions, SignalOracle};
use crate::models::{InstrumentProfile, MonitorPhase, Position, Signal};
use crate::risk::{RiskDecision, RiskGate};

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub min_recheck:    Duration,
    pub max_recheck:    Duration,
    pub max_concurrent: usize,
    pub min_confidence: f64,
    pub atr_period:     u32,
    pub venue:          CallPolicy,
    pub analysis:       CallPolicy,
}

impl SchedulerConfig {
    /// Uniform in `[min_recheck, max_recheck]`.
    pub fn next_sleep(&self) -> Duration {
        let lo = self.min_recheck.as_millis() as u64;
        let hi = self.max_recheck.as_millis() as u64;
        if hi <= lo {
            return self.min_recheck;
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// Everything the Scheduler talks to.
pub struct SchedulerDeps {
    pub venue:      Arc<dyn ExecutionGateway>,
    pub feed:       Arc<dyn MarketFeed>,
    pub oracle:     Arc<dyn SignalOracle>,
    pub guards:     Arc<dyn Preconditions>,
    pub signals:    SignalStore,
    pub supervisor: MonitorSupervisor,
    pub risk:       Arc<RiskGate>,
    pub journal:    Arc<Journal>,
    pub events:     EventBus,
}

// ─── Scheduler ────────────────────────────────────────────────────────────────

pub struct Scheduler {
    config:      SchedulerConfig,
    instruments: Vec<Arc<InstrumentProfile>>,
    deps:        SchedulerDeps,
    cycle:       AtomicU64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, instruments: Vec<Arc<InstrumentProfile>>, deps: SchedulerDeps) -> Self {
        Self { config, instruments, deps, cycle: AtomicU64::new(0) }
    }

    /// Cycle until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            instruments = ?self.instruments.iter().map(|p| p.symbol.as_str()).collect::<Vec<_>>(),
            cap         = self.config.max_concurrent,
            "🔁 scheduler started"
        );
        while !cancel.is_cancelled() {
            // a cycle in flight always finishes; an open is never abandoned halfway
            self.run_cycle().await;
            let pause = self.config.next_sleep();
            info!(secs = pause.as_secs(), "💤 next cycle");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!("🔁 scheduler stopped");
    }

    /// One pass over every instrument in declared order.
    pub async fn run_cycle(&self) -> Vec<StatusLine> {
        let cycle = self.cycle.fetch_add(1, Ordering::Relaxed) + 1;
        let mut lines = Vec::with_capacity(self.instruments.len());
        // once the cap is hit, later instruments are still monitored but never opened
        let mut cap_hit: Option<usize> = None;

        for profile in &self.instruments {
            let line = self.process(cycle, profile, &mut cap_hit).await;
            lines.push(line);
        }

        for line in &lines {
            if line.is_skip() {
                info!(cycle, "⏭️ {line}");
            } else {
                info!(cycle, "📋 {line}");
            }
            self.deps.journal.record(line.clone()).await;
            self.deps.events.publish(&EngineEvent::CycleStatus { line: Box::new(line.clone()) });
        }
        lines
    }

    async fn process(&self, cycle: u64, profile: &Arc<InstrumentProfile>, cap_hit: &mut Option<usize>) -> StatusLine {
        let symbol = profile.symbol.as_str();
        let cap = self.config.max_concurrent;
        let skip = |reason: SkipReason| StatusLine::new(cycle, symbol, Decision::Skipped { reason });
        let venue = self.deps.venue.clone();

        // ── [1] Position? ────────────────────────────────────────────────────
        let existing = bounded(&self.config.venue, "get_open_position", |_| {
            let venue = venue.clone();
            async move { venue.get_open_position(symbol).await }
        })
        .await;

        match existing {
            Ok(Some(position)) => return self.monitored(cycle, position).await,
            Ok(None) => {}
            Err(e) => {
                warn!(symbol, kind = e.kind(), error = %e, "position read failed");
                return skip(SkipReason::VenueError(e.to_string()));
            }
        }

        // ── [2] Global cap ───────────────────────────────────────────────────
        if let Some(open) = *cap_hit {
            return skip(SkipReason::CapReached { open, cap });
        }
        let total = bounded(&self.config.venue, "open_positions_total", |_| {
            let venue = venue.clone();
            async move { venue.open_positions_total().await }
        })
        .await;
        match total {
            Ok(open) if open >= cap => {
                *cap_hit = Some(open);
                return skip(SkipReason::CapReached { open, cap });
            }
            Ok(_) => {}
            Err(e) => return skip(SkipReason::VenueError(e.to_string())),
        }

        // ── [3] Preconditions (time-bounded, fail closed) ────────────────────
        let now = Utc::now();
        let guards = &self.deps.guards;
        match self.guarded(symbol, "trading_hours", guards.trading_hours_open(now)).await {
            Some(true) => {}
            Some(false) => return skip(SkipReason::MarketClosed),
            None => return skip(SkipReason::StructuralFilters(vec!["trading hours check timed out".into()])),
        }
        match self.guarded(symbol, "news_blackout", guards.news_blackout_active(symbol, now)).await {
            Some(false) => {}
            Some(true) => return skip(SkipReason::NewsBlackout),
            None => return skip(SkipReason::StructuralFilters(vec!["news check timed out".into()])),
        }
        match self.guarded(symbol, "structural_filters", guards.structural_filters_pass(symbol)).await {
            Some((true, _)) => {}
            Some((false, reasons)) => return skip(SkipReason::StructuralFilters(reasons)),
            None => return skip(SkipReason::StructuralFilters(vec!["structural filters timed out".into()])),
        }

        // ── [4] Analysis ─────────────────────────────────────────────────────
        let oracle = self.deps.oracle.clone();
        let signal = match bounded(&self.config.analysis, "analyze", |_| {
            let oracle = oracle.clone();
            async move { oracle.analyze(symbol).await }
        })
        .await
        {
            Ok(s) => s,
            Err(e) => return skip(SkipReason::AnalysisFailed(e.to_string())),
        };

        if !signal.direction.is_actionable() {
            return skip(SkipReason::NoDirection);
        }
        if signal.confidence < self.config.min_confidence {
            return skip(SkipReason::BelowThreshold {
                confidence: signal.confidence,
                min:        self.config.min_confidence,
            });
        }

        // ── [5] Risk transform ───────────────────────────────────────────────
        let atr = if profile.policy.needs_atr() {
            let feed = self.deps.feed.clone();
            let period = self.config.atr_period;
            match bounded(&self.config.venue, "current_atr", |_| {
                let feed = feed.clone();
                async move { feed.current_atr(symbol, period).await }
            })
            .await
            {
                Ok(v) => Some(v),
                Err(e) => return skip(SkipReason::VenueError(e.to_string())),
            }
        } else {
            None
        };

        let distances = match transform(&profile.policy, &signal, profile, atr) {
            Ok(d) => d,
            Err(e) => return skip(SkipReason::PolicyViolation(e.to_string())),
        };
        info!(
            symbol,
            policy         = %profile.policy.name(),
            policy_version = profile.policy_version,
            stop           = distances.stop,
            target         = distances.target,
            atr            = ?atr,
            "📐 distances"
        );

        // ── [6] Risk gate ────────────────────────────────────────────────────
        if let RiskDecision::Blocked(reason) = self.deps.risk.pre_trade_check().await {
            return skip(SkipReason::RiskBlocked(reason));
        }

        // ── [7] Open ─────────────────────────────────────────────────────────
        let order = OpenOrder {
            symbol:          symbol.to_string(),
            direction:       signal.direction,
            stop_distance:   distances.stop,
            target_distance: distances.target,
            volume:          profile.lot_size,
            comment:         format!("SNT-{}-v{}", profile.policy.name(), profile.policy_version),
        };

        match self.open_once(&order).await {
            Ok(position) => self.opened(cycle, position, signal, profile).await,
            Err(e) => {
                self.deps.risk.record_failure().await;
                skip(SkipReason::OpenFailed(e.to_string()))
            }
        }
    }

    /// `None` when the check outlives the venue timeout.
    async fn guarded<T>(&self, symbol: &str, check: &'static str, fut: impl Future<Output = T>) -> Option<T> {
        match tokio::time::timeout(self.config.venue.timeout, fut).await {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(symbol, check, timeout = ?self.config.venue.timeout, "⏱️ precondition timed out, skipping");
                None
            }
        }
    }

    /// Bounded open. Before every retry the venue is asked again whether a
    /// position already exists, so a lost confirmation never becomes a
    /// second position.
    async fn open_once(&self, order: &OpenOrder) -> Result<Position, EngineError> {
        let venue = self.deps.venue.clone();
        bounded(&self.config.venue, "open", |attempt| {
            let venue = venue.clone();
            async move {
                if attempt > 0 {
                    if let Some(p) = venue.get_open_position(&order.symbol).await? {
                        warn!(symbol = %order.symbol, ticket = p.ticket, "open already landed, adopting");
                        return Ok(p);
                    }
                }
                venue.open(order).await
            }
        })
        .await
    }

    async fn opened(&self, cycle: u64, position: Position, signal: Signal, profile: &InstrumentProfile) -> StatusLine {
        let symbol = profile.symbol.as_str();
        self.deps.risk.record_success().await;
        self.deps.signals.put(symbol, signal.clone()).await;
        if let Err(e) = self.deps.supervisor.start(symbol).await {
            warn!(symbol, error = %e, "monitor not started");
        }
        self.deps.events.publish(&EngineEvent::PositionOpened {
            symbol:    symbol.to_string(),
            ticket:    position.ticket,
            direction: position.direction,
            stop:      position.current_stop,
            target:    position.current_target,
            policy:    profile.policy.to_string(),
        });

        let mut line = StatusLine::new(
            cycle,
            symbol,
            Decision::Opened {
                ticket:     position.ticket,
                direction:  position.direction,
                confidence: signal.confidence,
                stop:       position.current_stop,
                target:     position.current_target,
            },
        );
        line.phase = Some(MonitorPhase::NoSlProtection);
        line.ticket = Some(position.ticket);
        line.unrealized_pnl = Some(position.unrealized_pnl);
        line
    }

    async fn monitored(&self, cycle: u64, position: Position) -> StatusLine {
        let symbol = position.symbol.as_str();
        // positions opened before this process (or by hand) get supervised too
        if let Err(e) = self.deps.supervisor.start(symbol).await {
            warn!(symbol, error = %e, "monitor not started");
        }
        let snapshot = self.deps.supervisor.snapshot(symbol).await;
        let phase = snapshot
            .as_ref()
            .filter(|s| s.state.ticket == Some(position.ticket))
            .map(|s| s.state.phase)
            .unwrap_or(MonitorPhase::NoSlProtection);

        let mut line = StatusLine::new(
            cycle,
            symbol,
            Decision::Monitored {
                elapsed_secs:    position.elapsed(Utc::now()).num_seconds(),
                monitor_running: self.deps.supervisor.is_running(symbol).await,
            },
        );
        line.phase = Some(phase);
        line.ticket = Some(position.ticket);
        line.unrealized_pnl = Some(position.unrealized_pnl);
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::DateTime;

    use crate::engine::monitor::{MonitorConfig, MonitorContext};
    use crate::gateway::paper::{Fault, PaperVenue, VenueCall};
    use crate::models::{Direction, RiskPolicy};
    use crate::risk::RiskConfig;

    /// Oracle with a canned answer per symbol; a missing symbol fails.
    struct ScriptedOracle(HashMap<String, Signal>);

    #[async_trait]
    impl SignalOracle for ScriptedOracle {
        async fn analyze(&self, symbol: &str) -> Result<Signal, EngineError> {
            self.0
                .get(symbol)
                .cloned()
                .ok_or_else(|| EngineError::AnalysisUnavailable(format!("{symbol}: brain offline")))
        }
    }

    #[derive(Default)]
    struct Gates {
        closed:  bool,
        news:    bool,
        /// symbol whose structural check never answers
        hang:    Option<&'static str>,
        filters: Option<Vec<String>>,
    }

    #[async_trait]
    impl Preconditions for Gates {
        async fn news_blackout_active(&self, _symbol: &str, _now: DateTime<Utc>) -> bool {
            self.news
        }
        async fn trading_hours_open(&self, _now: DateTime<Utc>) -> bool {
            !self.closed
        }
        async fn structural_filters_pass(&self, symbol: &str) -> (bool, Vec<String>) {
            if self.hang == Some(symbol) {
                std::future::pending::<()>().await;
            }
            match &self.filters {
                Some(reasons) => (false, reasons.clone()),
                None => (true, Vec::new()),
            }
        }
    }

    fn make_call() -> CallPolicy {
        CallPolicy { timeout: Duration::from_secs(5), retries: 2, backoff: Duration::ZERO }
    }

    fn make_profiles() -> Vec<Arc<InstrumentProfile>> {
        vec![
            Arc::new(InstrumentProfile::btcusd(RiskPolicy::FixedPips { sl_pips: 240.0, tp_pips: 70.0 })),
            Arc::new(InstrumentProfile::xauusd(RiskPolicy::FixedPips { sl_pips: 500.0, tp_pips: 140.0 })),
        ]
    }

    fn buy(symbol: &str, confidence: f64) -> (String, Signal) {
        (symbol.to_string(), Signal::new(symbol, Direction::Buy, confidence, 300.0, 90.0))
    }

    fn make_scheduler(
        venue: Arc<PaperVenue>,
        signals: Vec<(String, Signal)>,
        gates: Gates,
        max_concurrent: usize,
    ) -> Scheduler {
        make_scheduler_with(make_profiles(), venue, signals, gates, max_concurrent)
    }

    fn make_scheduler_with(
        profiles: Vec<Arc<InstrumentProfile>>,
        venue: Arc<PaperVenue>,
        signals: Vec<(String, Signal)>,
        gates: Gates,
        max_concurrent: usize,
    ) -> Scheduler {
        let events = EventBus::default();
        let store = SignalStore::new();
        let ctx = Arc::new(MonitorContext {
            venue:   venue.clone(),
            oracle:  Arc::new(ScriptedOracle(HashMap::new())),
            signals: store.clone(),
            events:  events.clone(),
            config:  MonitorConfig {
                poll_interval:           Duration::from_secs(3600),
                signal_refresh_polls:    0,
                breakeven_profit:        1_000_000.0,
                trailing_profit:         2_000_000.0,
                reversal_min_confidence: 78.0,
                venue:                   make_call(),
                analysis:                make_call(),
            },
        });
        let supervisor = MonitorSupervisor::new(
            profiles.clone(),
            ctx,
            CancellationToken::new(),
            Duration::from_secs(1),
        );
        Scheduler::new(
            SchedulerConfig {
                min_recheck:    Duration::from_secs(60),
                max_recheck:    Duration::from_secs(120),
                max_concurrent,
                min_confidence: 78.0,
                atr_period:     14,
                venue:          make_call(),
                analysis:       make_call(),
            },
            profiles,
            SchedulerDeps {
                venue:      venue.clone(),
                feed:       venue,
                oracle:     Arc::new(ScriptedOracle(signals.into_iter().collect())),
                guards:     Arc::new(gates),
                signals:    store,
                supervisor,
                risk:       Arc::new(RiskGate::new(RiskConfig::default(), events.clone())),
                journal:    Arc::new(Journal::new()),
                events,
            },
        )
    }

    async fn make_venue() -> Arc<PaperVenue> {
        let venue = Arc::new(PaperVenue::new());
        venue.set_quote("BTCUSD", 49_990.0, 50_000.0).await;
        venue.set_quote("XAUUSD", 2_349.80, 2_350.00).await;
        venue
    }

    fn skip_reason(line: &StatusLine) -> Option<&SkipReason> {
        match &line.decision {
            Decision::Skipped { reason } => Some(reason),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_fixed_policy_opens_at_expected_levels() {
        let venue = make_venue().await;
        let sched = make_scheduler(venue.clone(), vec![buy("BTCUSD", 85.0)], Gates::default(), 2);

        let lines = sched.run_cycle().await;
        match &lines[0].decision {
            Decision::Opened { direction, stop, target, .. } => {
                assert_eq!(*direction, Direction::Buy);
                assert_eq!(*stop, Some(49_760.0));
                assert_eq!(*target, Some(50_070.0));
            }
            other => panic!("expected Opened, got {other:?}"),
        }
        assert_eq!(lines[0].phase, Some(MonitorPhase::NoSlProtection));
        assert!(sched.deps.supervisor.is_running("BTCUSD").await);
        assert_eq!(sched.deps.signals.get("BTCUSD").await.map(|s| s.confidence), Some(85.0));
        // XAUUSD had no analysis
        assert!(matches!(skip_reason(&lines[1]), Some(SkipReason::AnalysisFailed(_))));
        sched.deps.supervisor.stop(None).await;
    }

    #[tokio::test]
    async fn test_lost_confirmation_never_double_opens() {
        let venue = make_venue().await;
        venue.fail_next(Fault::OpenLostConfirmation, 1).await;
        let sched = make_scheduler(venue.clone(), vec![buy("BTCUSD", 90.0)], Gates::default(), 2);

        let lines = sched.run_cycle().await;
        assert!(matches!(lines[0].decision, Decision::Opened { .. }));

        let opens = venue.calls().await.into_iter().filter(|c| matches!(c, VenueCall::Open { .. })).count();
        assert_eq!(opens, 1);
        assert_eq!(venue.positions().await.len(), 1);

        // next cycle sees the position and only monitors it
        let lines = sched.run_cycle().await;
        assert!(matches!(lines[0].decision, Decision::Monitored { monitor_running: true, .. }));
        assert_eq!(venue.positions().await.len(), 1);
        sched.deps.supervisor.stop(None).await;
    }

    #[tokio::test]
    async fn test_cap_is_never_exceeded() {
        let venue = make_venue().await;
        let sched = make_scheduler(
            venue.clone(),
            vec![buy("BTCUSD", 90.0), buy("XAUUSD", 90.0)],
            Gates::default(),
            1,
        );

        let lines = sched.run_cycle().await;
        assert!(matches!(lines[0].decision, Decision::Opened { .. }));
        assert_eq!(skip_reason(&lines[1]), Some(&SkipReason::CapReached { open: 1, cap: 1 }));
        assert_eq!(venue.positions().await.len(), 1);
        sched.deps.supervisor.stop(None).await;
    }

    #[tokio::test]
    async fn test_cap_reached_still_monitors_existing_positions() {
        let venue = make_venue().await;
        venue.inject_position("XAUUSD", Direction::Sell, 2_350.0, 1.0).await;
        let sched = make_scheduler(venue.clone(), vec![buy("BTCUSD", 90.0)], Gates::default(), 1);

        let lines = sched.run_cycle().await;
        assert_eq!(lines.len(), 2);
        assert_eq!(skip_reason(&lines[0]), Some(&SkipReason::CapReached { open: 1, cap: 1 }));
        assert!(matches!(lines[1].decision, Decision::Monitored { .. }));
        assert!(sched.deps.supervisor.is_running("XAUUSD").await);
        assert!(venue.calls().await.is_empty());
        sched.deps.supervisor.stop(None).await;
    }

    #[tokio::test]
    async fn test_failed_analysis_does_not_block_next_instrument() {
        let venue = make_venue().await;
        let sched = make_scheduler(venue.clone(), vec![buy("XAUUSD", 80.0)], Gates::default(), 2);

        let lines = sched.run_cycle().await;
        assert!(matches!(skip_reason(&lines[0]), Some(SkipReason::AnalysisFailed(_))));
        match &lines[1].decision {
            Decision::Opened { stop, target, .. } => {
                assert!((stop.unwrap() - 2_345.00).abs() < 1e-6);
                assert!((target.unwrap() - 2_351.40).abs() < 1e-6);
            }
            other => panic!("expected Opened, got {other:?}"),
        }
        sched.deps.supervisor.stop(None).await;
    }

    #[tokio::test]
    async fn test_skip_reasons_are_reported_per_instrument() {
        let venue = make_venue().await;
        let weak = Signal::new("XAUUSD", Direction::Sell, 60.0, 3.0, 1.0);
        let flat = Signal::no_trade("BTCUSD");
        let sched = make_scheduler(
            venue.clone(),
            vec![("BTCUSD".into(), flat), ("XAUUSD".into(), weak)],
            Gates::default(),
            2,
        );

        let lines = sched.run_cycle().await;
        assert_eq!(skip_reason(&lines[0]), Some(&SkipReason::NoDirection));
        assert_eq!(skip_reason(&lines[1]), Some(&SkipReason::BelowThreshold { confidence: 60.0, min: 78.0 }));
        assert!(venue.calls().await.is_empty());
        assert_eq!(sched.deps.journal.history(10).await.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_market_and_news_skip_before_analysis() {
        let venue = make_venue().await;
        let sched = make_scheduler(
            venue.clone(),
            vec![buy("BTCUSD", 90.0)],
            Gates { closed: true, ..Gates::default() },
            2,
        );
        let lines = sched.run_cycle().await;
        assert_eq!(skip_reason(&lines[0]), Some(&SkipReason::MarketClosed));

        let sched = make_scheduler(venue.clone(), vec![buy("BTCUSD", 90.0)], Gates { news: true, ..Gates::default() }, 2);
        let lines = sched.run_cycle().await;
        assert_eq!(skip_reason(&lines[0]), Some(&SkipReason::NewsBlackout));
        assert!(venue.positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_open_is_reported_and_counted() {
        let venue = make_venue().await;
        venue.fail_next(Fault::OpenRejected, 1).await;
        let sched = make_scheduler(venue.clone(), vec![buy("BTCUSD", 90.0)], Gates::default(), 2);

        let lines = sched.run_cycle().await;
        assert!(matches!(skip_reason(&lines[0]), Some(SkipReason::OpenFailed(_))));
        assert_eq!(sched.deps.risk.status().await.consecutive_failures, 1);
        assert!(venue.positions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_precondition_does_not_stall_the_cycle() {
        let venue = make_venue().await;
        let sched = make_scheduler(
            venue.clone(),
            vec![buy("BTCUSD", 90.0), buy("XAUUSD", 90.0)],
            Gates { hang: Some("BTCUSD"), ..Gates::default() },
            2,
        );

        let lines = tokio::time::timeout(Duration::from_secs(3600), sched.run_cycle())
            .await
            .expect("cycle finished");
        assert!(matches!(skip_reason(&lines[0]), Some(SkipReason::StructuralFilters(_))));
        assert!(matches!(lines[1].decision, Decision::Opened { .. }));
        let positions = venue.positions().await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "XAUUSD");
        sched.deps.supervisor.stop(None).await;
    }

    #[tokio::test]
    async fn test_structural_filters_skip_with_reasons() {
        let venue = make_venue().await;
        let gates = Gates { filters: Some(vec!["spread too wide".into()]), ..Gates::default() };
        let sched = make_scheduler(venue.clone(), vec![buy("BTCUSD", 90.0)], gates, 2);

        let lines = sched.run_cycle().await;
        assert_eq!(
            skip_reason(&lines[0]),
            Some(&SkipReason::StructuralFilters(vec!["spread too wide".into()]))
        );
        assert!(venue.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_band_reward_risk_is_skipped() {
        let venue = make_venue().await;
        let mut btc = InstrumentProfile::btcusd(RiskPolicy::FixedPips { sl_pips: 240.0, tp_pips: 70.0 });
        btc.min_reward_risk = 1.5;
        let sched = make_scheduler_with(vec![Arc::new(btc)], venue.clone(), vec![buy("BTCUSD", 90.0)], Gates::default(), 2);

        let lines = sched.run_cycle().await;
        assert!(matches!(skip_reason(&lines[0]), Some(SkipReason::PolicyViolation(_))));
        assert!(!venue.calls().await.iter().any(|c| matches!(c, VenueCall::Open { .. })));
        assert!(venue.positions().await.is_empty());
    }

    fn atr_profile() -> Arc<InstrumentProfile> {
        Arc::new(InstrumentProfile::btcusd(RiskPolicy::AtrAdaptive {
            sl_atr_mult:   1.5,
            tp_atr_mult:   3.0,
            sl_floor_pips: 50.0,
            tp_floor_pips: 100.0,
        }))
    }

    #[tokio::test]
    async fn test_atr_policy_sizes_from_venue_atr() {
        let venue = make_venue().await;
        venue.set_atr("BTCUSD", 180.0).await;
        let sched = make_scheduler_with(vec![atr_profile()], venue.clone(), vec![buy("BTCUSD", 90.0)], Gates::default(), 2);

        let lines = sched.run_cycle().await;
        match &lines[0].decision {
            Decision::Opened { stop, target, .. } => {
                assert_eq!(*stop, Some(49_730.0));
                assert_eq!(*target, Some(50_540.0));
            }
            other => panic!("expected Opened, got {other:?}"),
        }
        sched.deps.supervisor.stop(None).await;
    }

    #[tokio::test]
    async fn test_missing_atr_is_a_venue_skip() {
        let venue = make_venue().await;
        let sched = make_scheduler_with(vec![atr_profile()], venue.clone(), vec![buy("BTCUSD", 90.0)], Gates::default(), 2);

        let lines = sched.run_cycle().await;
        assert!(matches!(skip_reason(&lines[0]), Some(SkipReason::VenueError(_))));
        assert!(venue.positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_kill_switch_blocks_open() {
        let venue = make_venue().await;
        let sched = make_scheduler(venue.clone(), vec![buy("BTCUSD", 90.0)], Gates::default(), 2);
        sched.deps.risk.kill("operator").await;

        let lines = sched.run_cycle().await;
        assert!(matches!(skip_reason(&lines[0]), Some(SkipReason::RiskBlocked(_))));
        assert!(venue.calls().await.is_empty());
    }

    #[test]
    fn test_next_sleep_stays_in_range() {
        let cfg = SchedulerConfig {
            min_recheck:    Duration::from_secs(60),
            max_recheck:    Duration::from_secs(120),
            max_concurrent: 2,
            min_confidence: 78.0,
            atr_period:     14,
            venue:          make_call(),
            analysis:       make_call(),
        };
        for _ in 0..200 {
            let d = cfg.next_sleep();
            assert!(d >= cfg.min_recheck && d <= cfg.max_recheck);
        }
    }
}
