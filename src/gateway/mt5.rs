//! # gateway::mt5
//!
//! **MT5 Bridge** — คุยกับ MetaTrader 5 EA ผ่าน HTTP
//!
//! ## MT5 EA API Contract (ฝั่ง MQL5)
//!
//! | Method | Path                        | Body / Query                         |
//! |--------|-----------------------------|--------------------------------------|
//! | GET    | `/positions?symbol=`        | → `[Mt5Position]`                    |
//! | GET    | `/positions/total`          | → `{ "total": 1 }`                   |
//! | GET    | `/quote?symbol=`            | → `{ "bid": .., "ask": .. }`         |
//! | GET    | `/atr?symbol=&period=`      | → `{ "atr": .. }`                    |
//! | GET    | `/filters?symbol=`          | → `{ "pass": true, "reasons": [] }`  |
//! | POST   | `/order/send`               | `Mt5OrderRequest` → `Mt5TradeResponse` |
//! | POST   | `/order/modify`             | `{ ticket, sl }` → `Mt5TradeResponse`  |
//! | POST   | `/order/close`              | `{ ticket }` → `Mt5TradeResponse`      |
//!
//! retcode 10009 = `TRADE_RETCODE_DONE` (เท่านั้นที่ถือว่า success)

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::gateway::{ExecutionGateway, MarketFeed, OpenOrder, Quote};
use crate::guards::StructuralCheck;
use crate::models::{Direction, Position, Ticket};

const TRADE_RETCODE_DONE: u32 = 10009;
const MAGIC: u64 = 420001;

// ─── MT5 Request / Response ───────────────────────────────────────────────────

/// Payload ที่ส่งไปยัง `/order/send`
#[derive(Debug, Serialize)]
pub struct Mt5OrderRequest {
    pub symbol:  String,
    pub action:  &'static str,  // "BUY" | "SELL"
    pub volume:  f64,
    pub price:   f64,
    pub sl:      f64,
    pub tp:      f64,
    pub comment: String,
    pub magic:   u64,
}

#[derive(Debug, Deserialize)]
pub struct Mt5TradeResponse {
    /// MT5 Return Code — 10009 = SUCCESS
    pub retcode: u32,
    /// Ticket ของ Position ที่เปิด (มีเฉพาะ `/order/send`)
    pub order:   Option<u64>,
    /// ราคาที่ fill จริง
    pub price:   Option<f64>,
    pub comment: Option<String>,
}

/// Position ตามที่ EA รายงาน (`PositionGetXxx` ของ MQL5)
#[derive(Debug, Clone, Deserialize)]
pub struct Mt5Position {
    pub ticket:        u64,
    pub symbol:        String,
    #[serde(rename = "type")]
    pub side:          String,  // "BUY" | "SELL"
    pub volume:        f64,
    pub price_open:    f64,
    pub price_current: f64,
    /// 0.0 = ไม่มี SL (convention ของ MT5)
    #[serde(default)]
    pub sl:            f64,
    #[serde(default)]
    pub tp:            f64,
    /// Unix seconds
    pub time:          i64,
    pub profit:        f64,
}

impl Mt5Position {
    fn into_position(self) -> Result<Position, EngineError> {
        let direction = match self.side.to_ascii_uppercase().as_str() {
            "BUY" => Direction::Buy,
            "SELL" => Direction::Sell,
            other => {
                return Err(EngineError::VenueRejected(format!(
                    "position #{} has unknown type '{other}'",
                    self.ticket
                )))
            }
        };
        let opened_at = Utc
            .timestamp_opt(self.time, 0)
            .single()
            .unwrap_or_else(Utc::now);

        Ok(Position {
            symbol:         self.symbol,
            ticket:         self.ticket,
            direction,
            volume:         self.volume,
            open_price:     self.price_open,
            current_price:  self.price_current,
            current_stop:   (self.sl != 0.0).then_some(self.sl),
            current_target: (self.tp != 0.0).then_some(self.tp),
            opened_at,
            unrealized_pnl: self.profit,
        })
    }
}

#[derive(Deserialize)]
struct TotalResponse {
    total: usize,
}

#[derive(Deserialize)]
struct AtrResponse {
    atr: f64,
}

#[derive(Deserialize)]
struct FiltersResponse {
    pass:    bool,
    #[serde(default)]
    reasons: Vec<String>,
}

// ─── Mt5Bridge ────────────────────────────────────────────────────────────────

pub struct Mt5Bridge {
    base_url: String,
    client:   reqwest::Client,
}

impl Mt5Bridge {
    /// `client` ควรเป็นตัวเดียวกับที่ share ทั้งระบบ (connection pooling)
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string(), client }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, EngineError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_error(status, body));
        }
        Ok(response.json().await?)
    }

    async fn post_trade<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Mt5TradeResponse, EngineError> {
        let url = format!("{}{path}", self.base_url);

        // ── HTTP POST ─────────────────────────────────────────────────────────
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            error!(error = %e, url = %url, "MT5 unreachable");
            EngineError::from(e)
        })?;

        // ── HTTP Status ───────────────────────────────────────────────────────
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(http_status = %status, body = %body, "MT5 returned HTTP error");
            return Err(http_error(status, body));
        }

        // ── Parse + retcode ───────────────────────────────────────────────────
        let resp: Mt5TradeResponse = response.json().await?;
        if resp.retcode != TRADE_RETCODE_DONE {
            let msg = format!(
                "MT5 rejected {path}: retcode={} comment={}",
                resp.retcode,
                resp.comment.as_deref().unwrap_or("unknown")
            );
            warn!("{msg}");
            return Err(EngineError::VenueRejected(msg));
        }
        Ok(resp)
    }
}

fn http_error(status: reqwest::StatusCode, body: String) -> EngineError {
    let msg = format!("MT5 HTTP {status}: {body}");
    if status.is_server_error() {
        EngineError::TransientVenue(msg)
    } else {
        EngineError::VenueRejected(msg)
    }
}

fn action_for(direction: Direction) -> Result<&'static str, EngineError> {
    match direction {
        Direction::Buy => Ok("BUY"),
        Direction::Sell => Ok("SELL"),
        Direction::NoTrade => Err(EngineError::PolicyViolation(
            "cannot build order for NoTrade direction".into(),
        )),
    }
}

#[async_trait]
impl ExecutionGateway for Mt5Bridge {
    async fn get_open_position(&self, symbol: &str) -> Result<Option<Position>, EngineError> {
        let mut positions: Vec<Mt5Position> =
            self.get_json("/positions", &[("symbol", symbol.to_string())]).await?;
        positions.retain(|p| p.symbol == symbol);

        match positions.len() {
            0 => Ok(None),
            1 => positions.pop().map(Mt5Position::into_position).transpose(),
            n => Err(EngineError::InvariantViolation(format!(
                "{symbol}: {n} open positions at the venue"
            ))),
        }
    }

    async fn open_positions_total(&self) -> Result<usize, EngineError> {
        let resp: TotalResponse = self.get_json("/positions/total", &[]).await?;
        Ok(resp.total)
    }

    async fn open(&self, order: &OpenOrder) -> Result<Position, EngineError> {
        let action = action_for(order.direction)?;

        // ราคาสดทุก attempt → SL/TP คำนวณจากฝั่งที่จะ fill จริง
        let quote = self.current_price(&order.symbol).await?;
        let entry = quote.entry_for(order.direction);
        let (sl, tp) = order.levels_at(entry);

        let request = Mt5OrderRequest {
            symbol:  order.symbol.clone(),
            action,
            volume:  order.volume,
            price:   entry,
            sl,
            tp,
            comment: order.comment.clone(),
            magic:   MAGIC,
        };

        info!(
            symbol = %request.symbol,
            action = %request.action,
            volume = request.volume,
            price  = request.price,
            sl     = request.sl,
            tp     = request.tp,
            "🚀 [MT5] Sending order"
        );

        let resp = self.post_trade("/order/send", &request).await?;
        let ticket = resp
            .order
            .ok_or_else(|| EngineError::VenueRejected("MT5 accepted order without ticket".into()))?;
        let fill = resp.price.unwrap_or(entry);

        info!(ticket, fill, "✅ [MT5] order accepted");

        Ok(Position {
            symbol:         order.symbol.clone(),
            ticket,
            direction:      order.direction,
            volume:         order.volume,
            open_price:     fill,
            current_price:  quote.exit_for(order.direction),
            current_stop:   Some(request.sl),
            current_target: Some(request.tp),
            opened_at:      Utc::now(),
            unrealized_pnl: 0.0,
        })
    }

    async fn modify_stop(&self, ticket: Ticket, new_stop: f64) -> Result<(), EngineError> {
        self.post_trade("/order/modify", &serde_json::json!({ "ticket": ticket, "sl": new_stop }))
            .await
            .map(|_| ())
    }

    async fn close(&self, ticket: Ticket) -> Result<(), EngineError> {
        self.post_trade("/order/close", &serde_json::json!({ "ticket": ticket }))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl MarketFeed for Mt5Bridge {
    async fn current_price(&self, symbol: &str) -> Result<Quote, EngineError> {
        self.get_json("/quote", &[("symbol", symbol.to_string())]).await
    }

    async fn current_atr(&self, symbol: &str, period: u32) -> Result<f64, EngineError> {
        let resp: AtrResponse = self
            .get_json("/atr", &[("symbol", symbol.to_string()), ("period", period.to_string())])
            .await?;
        Ok(resp.atr)
    }
}

#[async_trait]
impl StructuralCheck for Mt5Bridge {
    async fn check(&self, symbol: &str) -> (bool, Vec<String>) {
        match self.get_json::<FiltersResponse>("/filters", &[("symbol", symbol.to_string())]).await {
            Ok(resp) => (resp.pass, resp.reasons),
            Err(e) => {
                warn!(symbol, error = %e, "structural filters unavailable");
                (false, vec![format!("filters unavailable: {e}")])
            }
        }
    }
}
