//! # engine::signal_store
//!
//! ล่าสุดเท่านั้น: 1 Signal ต่อ instrument, ไม่เก็บ history.
//! Scheduler เขียนตอนเปิด Position, Monitor เขียนตอน refresh เพื่อเช็ค reversal.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::Signal;

#[derive(Clone, Default)]
pub struct SignalStore {
    inner: Arc<RwLock<HashMap<String, Signal>>>,
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites whatever was stored for `symbol`.
    pub async fn put(&self, symbol: &str, signal: Signal) {
        self.inner.write().await.insert(symbol.to_string(), signal);
    }

    pub async fn get(&self, symbol: &str) -> Option<Signal> {
        self.inner.read().await.get(symbol).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<String, Signal> {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    #[tokio::test]
    async fn test_put_overwrites_per_symbol() {
        let store = SignalStore::new();
        assert!(store.get("BTCUSD").await.is_none());

        store.put("BTCUSD", Signal::new("BTCUSD", Direction::Buy, 80.0, 100.0, 200.0)).await;
        store.put("XAUUSD", Signal::new("XAUUSD", Direction::Sell, 90.0, 3.0, 6.0)).await;
        store.put("BTCUSD", Signal::new("BTCUSD", Direction::Sell, 81.0, 100.0, 200.0)).await;

        assert_eq!(store.get("BTCUSD").await.unwrap().direction, Direction::Sell);
        assert_eq!(store.get("XAUUSD").await.unwrap().direction, Direction::Sell);
        assert_eq!(store.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_writers_leave_one_entry() {
        let store = SignalStore::new();
        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let dir = if i % 2 == 0 { Direction::Buy } else { Direction::Sell };
                store.put("BTCUSD", Signal::new("BTCUSD", dir, i as f64, 1.0, 1.0)).await;
                store.get("BTCUSD").await
            }));
        }
        for t in tasks {
            assert!(t.await.unwrap().is_some());
        }
        assert_eq!(store.snapshot().await.len(), 1);
    }
}
