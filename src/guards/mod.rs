//! # guards
//!
//! Precondition gates checked before the Scheduler opens anything:
//!
//! 1. **Trading hours** — [`hours::TradingHours`]
//! 2. **News blackout** — [`news::NewsCalendar`]
//! 3. **Structural filters** — delegated to a [`StructuralCheck`] (the MT5 EA
//!    or the paper venue)
//!
//! [`GuardChain`] bundles them behind the [`Preconditions`] trait.

pub mod hours;
pub mod news;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::gateway::Preconditions;
use hours::TradingHours;
use news::NewsCalendar;

/// Instrument-specific structure / volume filters ("guardian" checks).
#[async_trait]
pub trait StructuralCheck: Send + Sync {
    /// `(pass, reasons)`; reasons are only meaningful on failure.
    async fn check(&self, symbol: &str) -> (bool, Vec<String>);
}

pub struct GuardChain {
    hours:      TradingHours,
    news:       NewsCalendar,
    structural: Arc<dyn StructuralCheck>,
    /// symbol → currencies watched for news
    currencies: HashMap<String, Vec<String>>,
}

impl GuardChain {
    pub fn new(
        hours: TradingHours,
        news: NewsCalendar,
        structural: Arc<dyn StructuralCheck>,
        currencies: HashMap<String, Vec<String>>,
    ) -> Self {
        Self { hours, news, structural, currencies }
    }
}

#[async_trait]
impl Preconditions for GuardChain {
    async fn news_blackout_active(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        let Some(ccys) = self.currencies.get(symbol) else { return false };
        match self.news.blocking_event(ccys, now).await {
            Some(ev) => {
                debug!(symbol, title = %ev.title, currency = %ev.currency, at = %ev.time_utc, "news window");
                true
            }
            None => false,
        }
    }

    async fn trading_hours_open(&self, now: DateTime<Utc>) -> bool {
        self.hours.is_open(now)
    }

    async fn structural_filters_pass(&self, symbol: &str) -> (bool, Vec<String>) {
        self.structural.check(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::paper::PaperVenue;
    use chrono::TimeZone;
    use news::{NewsConfig, NewsEvent};

    #[tokio::test]
    async fn test_chain_maps_symbol_to_currencies() {
        let nfp = Utc.with_ymd_and_hms(2024, 6, 7, 12, 30, 0).unwrap();
        let news = NewsCalendar::with_events(
            NewsConfig::default(),
            vec![NewsEvent { currency: "USD".into(), title: "NFP".into(), time_utc: nfp }],
        );
        let venue = Arc::new(PaperVenue::new());
        venue.set_structural_failures("XAUUSD", vec!["volume below average".into()]).await;

        let chain = GuardChain::new(
            TradingHours::always_open(),
            news,
            venue,
            HashMap::from([
                ("BTCUSD".to_string(), vec!["USD".to_string()]),
                ("EURJPY".to_string(), vec!["EUR".to_string(), "JPY".to_string()]),
            ]),
        );

        assert!(chain.news_blackout_active("BTCUSD", nfp).await);
        assert!(!chain.news_blackout_active("EURJPY", nfp).await);
        assert!(!chain.news_blackout_active("UNKNOWN", nfp).await);
        assert!(chain.trading_hours_open(nfp).await);

        assert_eq!(chain.structural_filters_pass("BTCUSD").await, (true, vec![]));
        let (pass, reasons) = chain.structural_filters_pass("XAUUSD").await;
        assert!(!pass);
        assert_eq!(reasons, vec!["volume below average".to_string()]);
    }
}
