//! # auth — API Key Middleware
//!
//! ป้องกัน Operator API ด้วย `X-API-Key` header
//!
//! ## Mode
//! - `API_KEY` ไม่ได้ตั้ง (หรือ empty) → **Allow All** (Dev Mode)
//! - `API_KEY` ตั้งค่า → ต้องส่ง `X-API-Key: <key>` ทุก Request
//!
//! ## ยกเว้น
//! `/api/health` ไม่ต้อง Auth
//!
//! ```bash
//! curl -H "X-API-Key: $API_KEY" -X POST http://localhost:3000/api/risk/kill
//! ```

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

const HEALTH_PATH: &str = "/api/health";

/// Axum middleware — ตรวจสอบ X-API-Key header
pub async fn require_api_key(request: Request<Body>, next: Next) -> Response {
    let api_key_env = std::env::var("API_KEY").unwrap_or_default();

    match check(&api_key_env, request.uri().path(), header_key(&request)) {
        Ok(()) => next.run(request).await,
        Err(path) => {
            warn!(path, "❌ Unauthorized request, invalid or missing X-API-Key");
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "ok":    false,
                    "error": "Unauthorized: invalid or missing X-API-Key header",
                })),
            )
                .into_response()
        }
    }
}

fn header_key(request: &Request<Body>) -> &str {
    request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// `Err(path)` when the request must be refused.
fn check(expected: &str, path: &str, provided: &str) -> Result<(), String> {
    if expected.is_empty() || path == HEALTH_PATH || provided == expected {
        Ok(())
    } else {
        Err(path.to_string())
    }
}
