//! # guards::news
//!
//! **News Blackout** — ห้ามเปิด Position ช่วงข่าวแรง (high impact)
//!
//! Instrument ถูก block เมื่อมี event ของสกุลเงินที่เกี่ยวข้องอยู่ในช่วง
//! `[event − before, event + after]`
//!
//! Calendar ดึงจาก `NEWS_URL` (JSON array ของ [`NewsEvent`]) อย่างมากทุก
//! `refresh_every`; ถ้าดึงไม่ได้ใช้ cache เดิมต่อ

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsEvent {
    pub currency: String,
    pub title:    String,
    #[serde(alias = "time")]
    pub time_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewsConfig {
    pub url:           Option<String>,
    pub before:        chrono::Duration,
    pub after:         chrono::Duration,
    pub refresh_every: Duration,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            url:           None,
            before:        chrono::Duration::minutes(60),
            after:         chrono::Duration::minutes(60),
            refresh_every: Duration::from_secs(600),
        }
    }
}

#[derive(Default)]
struct Cache {
    events:     Vec<NewsEvent>,
    fetched_at: Option<Instant>,
}

pub struct NewsCalendar {
    config: NewsConfig,
    client: reqwest::Client,
    cache:  RwLock<Cache>,
}

impl NewsCalendar {
    pub fn new(config: NewsConfig, client: reqwest::Client) -> Self {
        Self { config, client, cache: RwLock::new(Cache::default()) }
    }

    /// Static calendar, never refreshed.
    #[cfg(test)]
    pub fn with_events(config: NewsConfig, events: Vec<NewsEvent>) -> Self {
        Self {
            config: NewsConfig { url: None, ..config },
            client: reqwest::Client::new(),
            cache:  RwLock::new(Cache { events, fetched_at: None }),
        }
    }

    /// The first event blacking out any of `currencies` at `now`.
    pub async fn blocking_event(&self, currencies: &[String], now: DateTime<Utc>) -> Option<NewsEvent> {
        self.refresh_if_stale().await;
        let cache = self.cache.read().await;
        cache
            .events
            .iter()
            .filter(|ev| currencies.iter().any(|c| c.eq_ignore_ascii_case(&ev.currency)))
            .find(|ev| now >= ev.time_utc - self.config.before && now <= ev.time_utc + self.config.after)
            .cloned()
    }

    async fn refresh_if_stale(&self) {
        let Some(url) = self.config.url.as_deref() else { return };
        {
            let cache = self.cache.read().await;
            if cache.fetched_at.map(|t| t.elapsed() < self.config.refresh_every).unwrap_or(false) {
                return;
            }
        }

        let mut cache = self.cache.write().await;
        // another caller may have refreshed while we waited for the lock
        if cache.fetched_at.map(|t| t.elapsed() < self.config.refresh_every).unwrap_or(false) {
            return;
        }
        cache.fetched_at = Some(Instant::now());

        match self.fetch(url).await {
            Ok(events) => {
                info!(count = events.len(), "📰 news calendar refreshed");
                cache.events = events;
            }
            Err(e) => warn!(error = %e, cached = cache.events.len(), "news calendar fetch failed, keeping cache"),
        }
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<NewsEvent>> {
        use anyhow::Context;
        let events = self
            .client
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("calendar unreachable")?
            .error_for_status()
            .context("calendar HTTP error")?
            .json::<Vec<NewsEvent>>()
            .await
            .context("calendar parse error")?;
        Ok(events)
    }
}
