//! # error
//!
//! Two error types:
//!
//! - [`EngineError`]: everything the engine can fail with. The variant decides
//!   what happens next: transient venue errors are retried by
//!   [`engine::retry`](crate::engine::retry), policy violations become skips,
//!   invariant violations end one monitor. Closed news/session/structure
//!   gates are skip reasons, not errors.
//! - [`AppError`]: operator API failures, rendered as `{ "ok": false, "error": .. }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// ─── Engine ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Timeout, disconnect, 5xx. Retried up to the configured limit.
    #[error("transient venue error: {0}")]
    TransientVenue(String),

    /// The venue answered and said no (MT5 retcode != 10009, bad ticket, ...).
    #[error("venue rejected: {0}")]
    VenueRejected(String),

    /// Stop/target distances or reward/risk outside the instrument's bounds.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// State the engine cannot reason about (two positions on one instrument).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Close on reversal was not confirmed; the monitor retries next poll.
    #[error("reversal close failed: {0}")]
    ReversalCloseFailed(String),

    /// The signal oracle produced nothing usable.
    #[error("analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Worth another attempt within the same poll / cycle?
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientVenue(_) | EngineError::AnalysisUnavailable(_))
    }

    /// Short machine tag for status lines and events.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::TransientVenue(_)      => "TRANSIENT_VENUE",
            EngineError::VenueRejected(_)       => "VENUE_REJECTED",
            EngineError::PolicyViolation(_)     => "POLICY_VIOLATION",
            EngineError::InvariantViolation(_)  => "INVARIANT_VIOLATION",
            EngineError::ReversalCloseFailed(_) => "REVERSAL_CLOSE_FAILED",
            EngineError::AnalysisUnavailable(_) => "ANALYSIS_UNAVAILABLE",
            EngineError::Internal(_)            => "INTERNAL",
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            EngineError::TransientVenue(e.to_string())
        } else if e.status().map(|s| s.is_server_error()).unwrap_or(false) {
            EngineError::TransientVenue(e.to_string())
        } else {
            EngineError::VenueRejected(e.to_string())
        }
    }
}

// ─── API ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unknown instrument, or nothing recorded for it yet.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
