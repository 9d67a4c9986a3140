//! # routes::risk
//!
//! Risk Gate API Endpoints
//!
//! | Method | Path                    | Description                           |
//! |--------|-------------------------|---------------------------------------|
//! | POST   | `/api/risk/kill`        | เปิด Kill Switch (Monitor ยังทำงานต่อ)  |
//! | POST   | `/api/risk/rearm`       | ปิด Kill Switch                       |
//! | GET    | `/api/risk/status`      | ดู Risk Status                        |

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::state::SharedState;

#[derive(Deserialize)]
pub struct KillBody {
    pub reason: Option<String>,
}

/// POST /api/risk/kill — หยุดเปิด Position ใหม่ทันที
pub async fn kill_switch_on(
    State(state): State<SharedState>,
    Json(body): Json<Option<KillBody>>,
) -> impl IntoResponse {
    let reason = body
        .and_then(|b| b.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Manual kill via API".to_string());

    state.risk.kill(&reason).await;

    (StatusCode::OK, Json(json!({
        "ok":       true,
        "message":  format!("Kill switch activated: {reason}"),
        "monitors": state.supervisor.running().await,
    })))
}

/// POST /api/risk/rearm — เปิดให้ Scheduler เปิด Position ได้อีกครั้ง
pub async fn kill_switch_off(State(state): State<SharedState>) -> impl IntoResponse {
    state.risk.rearm().await;

    Json(json!({
        "ok":      true,
        "message": "Risk gate re-armed, new positions allowed",
    }))
}

/// GET /api/risk/status
pub async fn get_risk_status(State(state): State<SharedState>) -> impl IntoResponse {
    let status = state.risk.status().await;
    Json(json!({ "ok": true, "risk": status }))
}
