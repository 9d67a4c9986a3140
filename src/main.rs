//! # Sentinel — Position Lifecycle Engine
//!
//! ```text
//!  ┌──────────────┐  every 60–120 s   ┌──────────────────────────────────────┐
//!  │  Scheduler   │ ────────────────▶ │ per instrument (declared order)      │
//!  └──────┬───────┘                   │  position? → ensure monitor          │
//!         │                           │  else gates → analyze → transform    │
//!         │ open ok                   │       → risk gate → open             │
//!         ▼                           └──────────────────────────────────────┘
//!  ┌──────────────────┐  spawn / cancel  ┌─────────────────────────────┐
//!  │MonitorSupervisor │ ───────────────▶ │ PositionMonitor (1 / symbol)│ ── modify SL / close ──▶ MT5 bridge
//!  └──────────────────┘                  └─────────────────────────────┘
//!
//!  ┌─────────────┐  ws://host/ws/monitor  ◀── EventBus (EngineEvent JSON)
//!  │  Operator   │  GET  /api/monitor/*   /api/signals
//!  └─────────────┘  POST /api/risk/kill  ⛔
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{routing::{get, post}, Router};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod auth;
mod config;
mod engine;
mod error;
mod events;
mod gateway;
mod guards;
mod models;
mod risk;
mod routes;
mod state;

use auth::require_api_key;
use config::EngineConfig;
use engine::{Journal, MonitorContext, MonitorSupervisor, Scheduler, SchedulerDeps, SignalStore};
use events::EventBus;
use gateway::{
    mt5::Mt5Bridge,
    oracle::{BrainClient, NoTradeOracle},
    paper::PaperVenue,
    ExecutionGateway, MarketFeed, SignalOracle,
};
use guards::{news::NewsCalendar, GuardChain, StructuralCheck};
use models::InstrumentProfile;
use risk::RiskGate;
use routes::{
    monitor::{get_history, get_signals, get_status, get_symbol_status, health_check, ws_monitor},
    risk::{get_risk_status, kill_switch_off, kill_switch_on},
};
use state::{AppState, SharedState};

/// Mock-mode price ticker period.
const PAPER_TICK: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("sentinel=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║           SENTINEL — Position Lifecycle Engine        ║
  ║  Scheduler · Monitors · Breakeven · Trailing · Risk   ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Config ─────────────────────────────────────────────────────────────
    let config = EngineConfig::from_env().context("invalid configuration")?;
    for p in &config.instruments {
        info!(
            symbol         = %p.symbol,
            pip_size       = p.pip_size,
            policy         = %p.policy,
            policy_version = p.policy_version,
            "📐 instrument"
        );
    }

    let root = CancellationToken::new();
    let http = reqwest::Client::builder()
        .timeout(config.scheduler.venue.timeout)
        .build()
        .context("failed to build HTTP client")?;
    let profiles: Vec<Arc<InstrumentProfile>> = config.instruments.iter().cloned().map(Arc::new).collect();

    // ── 4. Collaborators ──────────────────────────────────────────────────────
    let (venue, feed, structural): (Arc<dyn ExecutionGateway>, Arc<dyn MarketFeed>, Arc<dyn StructuralCheck>) =
        if config.uses_paper_venue() {
            warn!("📝 MT5_BASE_URL=mock, running against the in-memory paper venue");
            let paper = Arc::new(PaperVenue::seeded().await);
            spawn_paper_ticker(paper.clone(), &profiles, root.clone());
            (paper.clone(), paper.clone(), paper)
        } else {
            info!(url = %config.mt5_base_url, "🔗 MT5 bridge");
            let bridge = Arc::new(Mt5Bridge::new(config.mt5_base_url.clone(), http.clone()));
            (bridge.clone(), bridge.clone(), bridge)
        };

    let oracle: Arc<dyn SignalOracle> = match &config.brain_url {
        Some(url) => {
            info!(%url, "🧠 signal oracle");
            Arc::new(BrainClient::new(url.clone(), http.clone()))
        }
        None => {
            warn!("🧠 BRAIN_URL not set, every analysis answers NONE");
            Arc::new(NoTradeOracle)
        }
    };

    let currencies: HashMap<String, Vec<String>> = profiles
        .iter()
        .map(|p| (p.symbol.clone(), p.news_currencies.clone()))
        .collect();
    let guards = Arc::new(GuardChain::new(
        config.hours.clone(),
        NewsCalendar::new(config.news.clone(), http.clone()),
        structural,
        currencies,
    ));

    // ── 5. Engine ─────────────────────────────────────────────────────────────
    let events = EventBus::default();
    let signals = SignalStore::new();
    let journal = Arc::new(Journal::new());
    let risk = Arc::new(RiskGate::new(config.risk.clone(), events.clone()));

    let supervisor = MonitorSupervisor::new(
        profiles.clone(),
        Arc::new(MonitorContext {
            venue:   venue.clone(),
            oracle:  oracle.clone(),
            signals: signals.clone(),
            events:  events.clone(),
            config:  config.monitor.clone(),
        }),
        root.clone(),
        config.monitor_grace,
    );

    let scheduler = Scheduler::new(
        config.scheduler.clone(),
        profiles,
        SchedulerDeps {
            venue,
            feed,
            oracle,
            guards,
            signals:    signals.clone(),
            supervisor: supervisor.clone(),
            risk:       risk.clone(),
            journal:    journal.clone(),
            events:     events.clone(),
        },
    );
    let scheduler_task = tokio::spawn({
        let cancel = root.clone();
        async move { scheduler.run(cancel).await }
    });

    // ── 6. Operator API ───────────────────────────────────────────────────────
    let state: SharedState = Arc::new(AppState::new(
        signals,
        supervisor.clone(),
        journal,
        risk,
        events,
        config.instruments.iter().map(|p| p.symbol.clone()).collect(),
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/health",                 get(health_check))
        // ── Monitor Loop ──────────────────────────────────────────────────────
        .route("/ws/monitor",                 get(ws_monitor))
        .route("/api/monitor/status",         get(get_status))
        .route("/api/monitor/status/:symbol", get(get_symbol_status))
        .route("/api/monitor/history",        get(get_history))
        .route("/api/signals",                get(get_signals))
        // ── Risk Management ───────────────────────────────────────────────────
        .route("/api/risk/kill",              post(kill_switch_on))
        .route("/api/risk/rearm",             post(kill_switch_off))
        .route("/api/risk/status",            get(get_risk_status))
        // ── Middleware ────────────────────────────────────────────────────────
        .layer(axum::middleware::from_fn(require_api_key))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    // ── 7. Bind & Serve ───────────────────────────────────────────────────────
    info!(addr = ?config.bind_addr, "🚀 Sentinel operator API starting");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let mut server = tokio::spawn({
        let stop = root.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        }
    });

    // ── 8. Shutdown ───────────────────────────────────────────────────────────
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl_c")?;
            info!("🛑 ctrl_c received, shutting down");
        }
        result = &mut server => {
            warn!(?result, "operator API exited on its own, shutting down");
        }
    }
    root.cancel();

    if let Err(e) = scheduler_task.await {
        warn!(error = %e, "scheduler task ended abnormally");
    }

    let report = supervisor.stop(None).await;
    info!(stopped = ?report.stopped, abandoned = ?report.abandoned, "👁️ monitors stopped");

    // open WebSocket sessions keep graceful shutdown waiting; bound it
    if !server.is_finished() && tokio::time::timeout(config.monitor_grace, &mut server).await.is_err() {
        warn!("operator API did not drain in time");
        server.abort();
    }

    info!("👋 bye");
    Ok(())
}

/// Random walk on every paper quote so monitors have something to react to.
fn spawn_paper_ticker(paper: Arc<PaperVenue>, profiles: &[Arc<InstrumentProfile>], cancel: CancellationToken) {
    let steps: Vec<(String, f64)> = profiles.iter().map(|p| (p.symbol.clone(), p.pips(5.0))).collect();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(PAPER_TICK) => {
                    for (symbol, step) in &steps {
                        paper.jitter(symbol, *step).await;
                    }
                }
            }
        }
    });
}
