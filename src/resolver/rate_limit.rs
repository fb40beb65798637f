//! Distributed minimum-interval rate limiter.
//!
//! The last request time for each provider is kept in the shared
//! [`KvStore`] under `ratelimit:{provider}`, so every worker pointed at the
//! same store spaces its requests against everyone else's. The
//! read-check-write sequence is not atomic: two callers can pass together.
//! Provider limits carry enough margin for that.
//!
//! If the store cannot be read or written the limiter logs a warning and lets
//! the request through ([`RateLimitOutcome::Degraded`]).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::store::KvStore;

/// Floor for a rate-limit token's expiry.
const MIN_TOKEN_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    /// The interval had already elapsed.
    Proceeded,
    /// Slept for the remainder of the interval.
    Waited(Duration),
    /// The shared store failed; no wait was enforced.
    Degraded,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    fn key(provider_key: &str) -> String {
        format!("ratelimit:{provider_key}")
    }

    /// Wait until at least `interval` has passed since the last request to
    /// `provider_key`, then claim the slot.
    pub async fn wait(&self, provider_key: &str, interval: Duration) -> RateLimitOutcome {
        if interval.is_zero() {
            return RateLimitOutcome::Proceeded;
        }

        let key = Self::key(provider_key);
        let last_ms = match self.store.get(&key).await {
            Ok(bytes) => bytes.and_then(|b| std::str::from_utf8(&b).ok()?.parse::<i64>().ok()),
            Err(e) => {
                warn!(
                    provider = %provider_key,
                    error = %e,
                    "Rate limit store unavailable; proceeding without waiting"
                );
                return RateLimitOutcome::Degraded;
            }
        };

        let now_ms = self.clock.now().timestamp_millis();
        let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);

        let mut outcome = RateLimitOutcome::Proceeded;
        let mut slot_ms = now_ms;
        if let Some(last_ms) = last_ms {
            let next_allowed = last_ms.saturating_add(interval_ms);
            if next_allowed > now_ms {
                let remaining = Duration::from_millis((next_allowed - now_ms) as u64);
                debug!(
                    provider = %provider_key,
                    wait_ms = remaining.as_millis() as u64,
                    "Rate limiting"
                );
                tokio::time::sleep(remaining).await;
                slot_ms = next_allowed;
                outcome = RateLimitOutcome::Waited(remaining);
            }
        }

        let ttl = (interval * 2).max(MIN_TOKEN_TTL);
        if let Err(e) = self
            .store
            .put(&key, slot_ms.to_string().into_bytes(), ttl)
            .await
        {
            warn!(
                provider = %provider_key,
                error = %e,
                "Failed to record rate limit token; proceeding"
            );
            return RateLimitOutcome::Degraded;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::test_support::{capture_logs, FailingStore};
    use chrono::{TimeZone, Utc};

    fn limiter() -> (RateLimiter, Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap(),
        ));
        let store = MemoryStore::with_clock(clock.clone());
        (
            RateLimiter::new(Arc::new(store.clone()), clock.clone()),
            clock,
            store,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_request_proceeds() {
        let (limiter, _clock, store) = limiter();
        let outcome = limiter.wait("open_library", Duration::from_secs(1)).await;
        assert_eq!(outcome, RateLimitOutcome::Proceeded);
        assert!(crate::store::KvStore::get(&store, "ratelimit:open_library")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_waits_for_remaining_interval() {
        let (limiter, clock, _store) = limiter();
        limiter.wait("isbndb", Duration::from_millis(1000)).await;

        clock.advance(Duration::from_millis(200));
        let outcome = limiter.wait("isbndb", Duration::from_millis(1000)).await;
        assert_eq!(outcome, RateLimitOutcome::Waited(Duration::from_millis(800)));
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_waits_queue_up() {
        let (limiter, _clock, _store) = limiter();
        limiter.wait("p", Duration::from_millis(500)).await;
        assert_eq!(
            limiter.wait("p", Duration::from_millis(500)).await,
            RateLimitOutcome::Waited(Duration::from_millis(500))
        );
        // The clock has not moved, but the claimed slot has.
        assert_eq!(
            limiter.wait("p", Duration::from_millis(500)).await,
            RateLimitOutcome::Waited(Duration::from_millis(1000))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn providers_are_independent() {
        let (limiter, _clock, _store) = limiter();
        limiter.wait("a", Duration::from_secs(1)).await;
        assert_eq!(
            limiter.wait("b", Duration::from_secs(1)).await,
            RateLimitOutcome::Proceeded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_interval_proceeds() {
        let (limiter, clock, _store) = limiter();
        limiter.wait("p", Duration::from_secs(1)).await;
        clock.advance(Duration::from_secs(2));
        assert_eq!(
            limiter.wait("p", Duration::from_secs(1)).await,
            RateLimitOutcome::Proceeded
        );
    }

    #[tokio::test]
    async fn store_failure_degrades_and_logs() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let limiter = RateLimiter::new(Arc::new(FailingStore), clock);

        let (outcome, logs) = capture_logs(limiter.wait("p", Duration::from_secs(5))).await;
        assert_eq!(outcome, RateLimitOutcome::Degraded);
        assert!(logs.contains("proceeding without waiting"), "logs: {logs}");
    }
}
