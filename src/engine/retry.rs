//! # engine::retry
//!
//! Bounded call discipline for every external collaborator: each attempt is
//! wrapped in a timeout, transient failures are retried a small fixed number
//! of times, anything else returns immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallPolicy {
    /// Per-attempt deadline.
    pub timeout: Duration,
    /// Extra attempts after the first (0 = single shot).
    pub retries: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries, backoff: Duration::from_millis(500) }
    }

    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Run `call(attempt)` until it succeeds, fails non-transiently, or the
/// attempts run out. `attempt` starts at 0 so the caller can refresh inputs
/// (price, position) before a retry.
pub async fn bounded<T, F, Fut>(policy: &CallPolicy, op: &str, mut call: F) -> Result<T, EngineError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, call(attempt)).await {
            Ok(r) => r,
            Err(_) => Err(EngineError::TransientVenue(format!(
                "{op} timed out after {}ms",
                policy.timeout.as_millis()
            ))),
        };

        match result {
            Ok(v) => {
                if attempt > 0 {
                    debug!(op, attempt, "retry succeeded");
                }
                return Ok(v);
            }
            Err(e) if e.is_transient() && attempt < policy.retries => {
                warn!(op, attempt = attempt + 1, of = policy.attempts(), error = %e, "⏳ transient failure, retrying");
                attempt += 1;
                tokio::time::sleep(policy.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
