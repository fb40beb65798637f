//! Daily quota circuit breaker for metered providers.
//!
//! Two-phase protocol around every metered request:
//!
//! 1. [`QuotaManager::check_quota`] before the request. If the call would push
//!    usage past the daily limit (less any reserve) the breaker is open and
//!    the request must not be sent.
//! 2. [`QuotaManager::record_api_call`] after the request, whether it
//!    succeeded or not. Upstream bills attempts, not successes.
//!
//! Usage is an atomic counter in the shared store, keyed by the start of the
//! provider's billing day. A new day means a new key, so the reset is a pure
//! function of the timestamp and there is no half-open state.
//!
//! The breaker fails closed: if the store cannot be read the check denies the
//! call. If a record cannot be written the cost is kept in an in-process
//! pending counter that is added to later checks and flushed on the next
//! successful record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::clock::SharedClock;
use crate::store::{decode_counter, KvStore, StoreError};

/// Counters outlive their window so late readers still see them.
const COUNTER_TTL: Duration = Duration::from_secs(2 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub daily_limit: u64,
    /// Calls withheld from routine traffic.
    pub reserve: u64,
    /// UTC hour at which the billing day starts.
    pub reset_hour_utc: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    /// Quota available.
    Closed,
    /// Quota exhausted until the next reset.
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub provider: String,
    pub used_today: u64,
    pub daily_limit: u64,
    pub remaining: u64,
    pub window_start: DateTime<Utc>,
    pub resets_at: DateTime<Utc>,
    pub state: BreakerState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub status: QuotaStatus,
    pub reason: Option<String>,
}

/// Start of the billing day containing `ts`.
///
/// The day runs from `reset_hour_utc:00` to the same hour the next day.
pub fn window_start(ts: DateTime<Utc>, reset_hour_utc: u8) -> DateTime<Utc> {
    let hour = u32::from(reset_hour_utc.min(23));
    let reset_time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let today = Utc.from_utc_datetime(&ts.date_naive().and_time(reset_time));
    if ts >= today {
        today
    } else {
        today - ChronoDuration::days(1)
    }
}

#[derive(Clone)]
pub struct QuotaManager {
    provider: String,
    policy: QuotaPolicy,
    store: Arc<dyn KvStore>,
    clock: SharedClock,
    pending: Arc<AtomicU64>,
}

impl QuotaManager {
    pub fn new(
        provider: impl Into<String>,
        policy: QuotaPolicy,
        store: Arc<dyn KvStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            provider: provider.into(),
            policy,
            store,
            clock,
            pending: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    fn counter_key(&self, window: DateTime<Utc>) -> String {
        format!("quota:{}:{}", self.provider, window.format("%Y-%m-%dT%H"))
    }

    fn build_status(&self, used: u64, window: DateTime<Utc>) -> QuotaStatus {
        let limit = self.policy.daily_limit;
        QuotaStatus {
            provider: self.provider.clone(),
            used_today: used,
            daily_limit: limit,
            remaining: limit.saturating_sub(used),
            window_start: window,
            resets_at: window + ChronoDuration::days(1),
            state: if used >= limit {
                BreakerState::Open
            } else {
                BreakerState::Closed
            },
        }
    }

    /// Current usage, including costs not yet written to the store.
    pub async fn status(&self) -> Result<QuotaStatus, StoreError> {
        let window = window_start(self.clock.now(), self.policy.reset_hour_utc);
        let key = self.counter_key(window);
        let stored = match self.store.get(&key).await? {
            Some(bytes) => decode_counter(&key, &bytes)?,
            None => 0,
        };
        let used = stored.saturating_add(self.pending.load(Ordering::SeqCst));
        Ok(self.build_status(used, window))
    }

    /// Phase one: may a request costing `cost` be sent, keeping `reserve`
    /// calls in hand?
    pub async fn check_quota(&self, cost: u64, reserve: u64) -> QuotaCheck {
        let status = match self.status().await {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    provider = %self.provider,
                    error = %e,
                    "Quota store unavailable; failing closed"
                );
                let window = window_start(self.clock.now(), self.policy.reset_hour_utc);
                // Unknown usage reads as a spent day.
                let status = self.build_status(self.policy.daily_limit, window);
                return QuotaCheck {
                    allowed: false,
                    status,
                    reason: Some(format!("quota state unavailable: {e}")),
                };
            }
        };

        let budget = self.policy.daily_limit.saturating_sub(reserve);
        let allowed = status.used_today.saturating_add(cost) <= budget;
        let reason = (!allowed).then(|| {
            format!(
                "{} of {} calls used today (cost {}, reserve {}); resets at {}",
                status.used_today,
                status.daily_limit,
                cost,
                reserve,
                status.resets_at.to_rfc3339()
            )
        });

        if !allowed {
            debug!(provider = %self.provider, used = status.used_today, "Quota breaker open");
        }

        QuotaCheck {
            allowed,
            status,
            reason,
        }
    }

    /// Phase two: record an attempted request. Call this after every request
    /// that was actually sent, including failed ones.
    pub async fn record_api_call(&self, cost: u64) -> Result<u64, StoreError> {
        let window = window_start(self.clock.now(), self.policy.reset_hour_utc);
        let key = self.counter_key(window);
        // Carried cost leaves `pending` only once the store holds it.
        let carried = self.pending.load(Ordering::SeqCst);
        let amount = cost.saturating_add(carried);

        match self.store.increment(&key, amount, COUNTER_TTL).await {
            Ok(total) => {
                let _ = self
                    .pending
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| Some(p.saturating_sub(carried)));
                debug!(provider = %self.provider, used = total, "Recorded metered call");
                Ok(total)
            }
            Err(e) => {
                self.pending.fetch_add(cost, Ordering::SeqCst);
                error!(
                    provider = %self.provider,
                    cost = amount,
                    error = %e,
                    "Failed to record metered call; holding cost in memory"
                );
                Err(e)
            }
        }
    }
}
