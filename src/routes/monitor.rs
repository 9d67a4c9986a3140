//! # routes::monitor
//!
//! **Monitor Loop** — Endpoints สำหรับ Operator Dashboard
//!
//! ## Endpoints
//!
//! | Method    | Path                            | Description                                   |
//! |-----------|---------------------------------|-----------------------------------------------|
//! | GET       | `/api/health`                   | liveness + uptime                              |
//! | GET (WS)  | `/ws/monitor`                   | WebSocket real-time EngineEvent stream         |
//! | GET       | `/api/monitor/status`           | status line ล่าสุดต่อ instrument + monitors     |
//! | GET       | `/api/monitor/status/:symbol`   | status + monitor snapshot ของ 1 instrument     |
//! | GET       | `/api/monitor/history?limit=N`  | decision journal (เก่าก่อน ใหม่สุดท้ายสุด)         |
//! | GET       | `/api/signals`                  | Signal ล่าสุดใน SignalStore                     |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::{engine::report::JOURNAL_CAPACITY, error::AppError, state::SharedState};

// ─── Health ───────────────────────────────────────────────────────────────────

/// GET /api/health — ไม่ต้อง Auth
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "ok":          true,
        "service":     "sentinel",
        "uptime_secs": state.uptime_secs(),
        "monitors":    state.supervisor.running().await.len(),
    }))
}

// ─── WebSocket Handler ────────────────────────────────────────────────────────

/// Upgrade HTTP → WebSocket แล้ว subscribe EventBus
///
/// ทุก EngineEvent จะถูกส่งมาเป็น JSON text frame
pub async fn ws_monitor(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.events.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 WebSocket client connected");

    // ── ส่ง Snapshot ปัจจุบันทันทีที่ต่อ ─────────────────────────────────────
    let snapshot = json!({
        "event":    "SNAPSHOT",
        "status":   state.journal.latest().await,
        "monitors": state.supervisor.snapshots().await,
        "risk":     state.risk.status().await,
    })
    .to_string();

    if sender.send(Message::Text(snapshot)).await.is_err() {
        return; // Client ปิดก่อน snapshot ส่งได้
    }

    // ── Event Loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("WS client lagged, skipped {n} events");
                    }
                    Err(_) => break,
                }
            }

            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("🔌 WebSocket client disconnected");
}

// ─── REST Monitoring Endpoints ────────────────────────────────────────────────

/// GET /api/monitor/status — status line ล่าสุดของทุก instrument
pub async fn get_status(State(state): State<SharedState>) -> impl IntoResponse {
    let latest = state.journal.latest().await;
    let status: Vec<_> = state
        .instruments
        .iter()
        .map(|symbol| json!({ "symbol": symbol, "line": latest.get(symbol) }))
        .collect();

    Json(json!({
        "ok":       true,
        "status":   status,
        "running":  state.supervisor.running().await,
        "monitors": state.supervisor.snapshots().await,
    }))
}

/// GET /api/monitor/status/:symbol
pub async fn get_symbol_status(
    State(state): State<SharedState>,
    Path(symbol): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let symbol = symbol.to_ascii_uppercase();
    if !state.instruments.contains(&symbol) {
        return Err(AppError::NotFound(format!("{symbol} is not a configured instrument")));
    }
    Ok(Json(json!({
        "ok":      true,
        "symbol":  symbol,
        "line":    state.journal.latest_for(&symbol).await,
        "monitor": state.supervisor.snapshot(&symbol).await,
        "signal":  state.signals.get(&symbol).await,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /api/monitor/history — decision journal, N รายการล่าสุด เรียงเก่า → ใหม่
pub async fn get_history(
    State(state): State<SharedState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit = q.limit.unwrap_or(100);
    if limit == 0 || limit > JOURNAL_CAPACITY {
        return Err(AppError::BadRequest(format!("limit must be within 1..={JOURNAL_CAPACITY}")));
    }
    let records = state.journal.history(limit).await;
    Ok(Json(json!({
        "ok":      true,
        "count":   records.len(),
        "records": records,
    })))
}

/// GET /api/signals — Signal ล่าสุดที่ Scheduler / Monitor เขียนไว้
pub async fn get_signals(State(state): State<SharedState>) -> impl IntoResponse {
    let signals = state.signals.snapshot().await;
    Json(json!({
        "ok":      true,
        "count":   signals.len(),
        "signals": signals,
    }))
}
