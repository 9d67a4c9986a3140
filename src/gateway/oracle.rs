//! # gateway::oracle
//!
//! Signal Oracle adapters.
//!
//! - [`BrainClient`] — `POST {BRAIN_URL}/api/brain/analyze` (external inference service)
//! - [`NoTradeOracle`] — ตอบ NONE ทุกครั้ง ใช้เมื่อไม่ได้ตั้ง `BRAIN_URL`
//!   ระบบยัง monitor position ที่เปิดอยู่ได้ แต่จะไม่เปิดใหม่

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::gateway::SignalOracle;
use crate::models::{Direction, Signal};

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    symbol: &'a str,
}

/// คำตอบจาก Brain
#[derive(Debug, Deserialize)]
pub struct AnalyzeResponse {
    pub direction:   Direction,
    pub confidence:  f64,
    #[serde(default)]
    pub sl_distance: f64,
    #[serde(default)]
    pub tp_distance: f64,
}

pub struct BrainClient {
    base_url: String,
    client:   reqwest::Client,
}

impl BrainClient {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string(), client }
    }
}

#[async_trait]
impl SignalOracle for BrainClient {
    async fn analyze(&self, symbol: &str) -> Result<Signal, EngineError> {
        let url = format!("{}/api/brain/analyze", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&AnalyzeRequest { symbol })
            .send()
            .await
            .map_err(|e| EngineError::AnalysisUnavailable(format!("brain unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(symbol, http_status = %status, "brain returned HTTP error");
            return Err(EngineError::AnalysisUnavailable(format!("brain HTTP {status}: {body}")));
        }

        let resp: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| EngineError::AnalysisUnavailable(format!("brain response parse error: {e}")))?;

        debug!(
            symbol,
            direction  = %resp.direction,
            confidence = resp.confidence,
            "🧠 brain verdict"
        );
        Ok(Signal::new(symbol, resp.direction, resp.confidence, resp.sl_distance, resp.tp_distance))
    }
}

#[derive(Debug, Default)]
pub struct NoTradeOracle;

#[async_trait]
impl SignalOracle for NoTradeOracle {
    async fn analyze(&self, symbol: &str) -> Result<Signal, EngineError> {
        Ok(Signal::no_trade(symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_response_accepts_none() {
        let resp: AnalyzeResponse =
            serde_json::from_str(r#"{"direction":"NONE","confidence":12}"#).unwrap();
        assert_eq!(resp.direction, Direction::NoTrade);
        assert_eq!(resp.sl_distance, 0.0);
    }

    #[tokio::test]
    async fn test_no_trade_oracle_never_trades() {
        let s = NoTradeOracle.analyze("XAUUSD").await.unwrap();
        assert_eq!(s.direction, Direction::NoTrade);
        assert_eq!(s.confidence, 0.0);
    }
}
