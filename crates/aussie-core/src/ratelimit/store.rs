//! Pluggable distributed store with an in-memory fast path (spec §4.2, §6).
//! Generalizes the teacher's `RateLimitStore` (`Arc<RwLock<HashMap>>` plus
//! periodic `cleanup_expired_entries`) from an Actix-middleware-private type
//! into a trait any backend can implement.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::warn;

use crate::models::rate_limit::{EffectiveRateLimit, RateLimitDecision, RateLimitKey, RateLimitState};
use crate::ratelimit::algorithms::{check_and_consume, initial_state, RateLimitAlgorithm};

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomic `checkAndConsume` (spec §6 `RateLimitStore` contract). Must be
    /// atomic with respect to concurrent callers sharing the same key.
    async fn check_and_consume(
        &self,
        key: &RateLimitKey,
        algorithm: RateLimitAlgorithm,
        limit: EffectiveRateLimit,
        now_ms: i64,
    ) -> Result<RateLimitDecision, StoreError>;
}

#[derive(Debug, thiserror::Error)]
#[error("rate limit store error: {0}")]
pub struct StoreError(pub String);

struct Entry {
    state: RateLimitState,
    expires_at_ms: i64,
}

/// In-memory store keyed by the canonical string, guarded by a single
/// mutex (mirrors the teacher's `Arc<RwLock<HashMap<String, RateLimitEntry>>>`
/// but a `Mutex` since every access here mutates).
pub struct InMemoryRateLimitStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Periodic sweep removing entries past `2 x window_seconds` of
    /// inactivity (spec §3 "Lifecycle ownership").
    pub fn cleanup_expired_entries(&self, now_ms: i64) {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at_ms > now_ms);
        let removed = before - entries.len();
        if removed > 0 {
            log::debug!("rate limit store: evicted {removed} expired entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn check_and_consume(
        &self,
        key: &RateLimitKey,
        algorithm: RateLimitAlgorithm,
        limit: EffectiveRateLimit,
        now_ms: i64,
    ) -> Result<RateLimitDecision, StoreError> {
        let canonical = key.canonical();
        let mut entries = self.entries.lock().unwrap();
        let state = entries
            .get(&canonical)
            .map(|e| e.state)
            .unwrap_or_else(|| initial_state(algorithm, limit, now_ms));

        let (decision, next_state) = check_and_consume(state, limit, now_ms);
        let expires_at_ms = now_ms + 2 * (limit.window_seconds as i64) * 1000;
        entries.insert(
            canonical,
            Entry {
                state: next_state,
                expires_at_ms,
            },
        );
        Ok(decision)
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Wraps any `RateLimitStore` with the fail-open policy mandated for the
/// generic limiter (spec §4.2): a store timeout/error permits the request
/// and logs a counter rather than rejecting it.
pub async fn check_and_consume_fail_open(
    store: &Arc<dyn RateLimitStore>,
    key: &RateLimitKey,
    algorithm: RateLimitAlgorithm,
    limit: EffectiveRateLimit,
) -> RateLimitDecision {
    let now = now_ms();
    match store.check_and_consume(key, algorithm, limit, now).await {
        Ok(decision) => decision,
        Err(err) => {
            warn!("rate limit store unavailable, failing open: {err}");
            RateLimitDecision::Allow {
                remaining: limit.requests_per_window,
                reset_at_secs: (now / 1000) as u64 + limit.window_seconds,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rate_limit::RateLimitKey;

    fn limit() -> EffectiveRateLimit {
        EffectiveRateLimit {
            requests_per_window: 2,
            window_seconds: 60,
            burst_capacity: 2,
        }
    }

    #[tokio::test]
    async fn rejects_after_capacity_exhausted() {
        let store = InMemoryRateLimitStore::new();
        let key = RateLimitKey::http("client-a", "demo", None);
        let now = 0;
        let first = store
            .check_and_consume(&key, RateLimitAlgorithm::FixedWindow, limit(), now)
            .await
            .unwrap();
        let second = store
            .check_and_consume(&key, RateLimitAlgorithm::FixedWindow, limit(), now)
            .await
            .unwrap();
        let third = store
            .check_and_consume(&key, RateLimitAlgorithm::FixedWindow, limit(), now)
            .await
            .unwrap();
        assert!(matches!(first, RateLimitDecision::Allow { .. }));
        assert!(matches!(second, RateLimitDecision::Allow { .. }));
        assert!(matches!(third, RateLimitDecision::Reject { .. }));
    }

    #[tokio::test]
    async fn cleanup_evicts_stale_entries() {
        let store = InMemoryRateLimitStore::new();
        let key = RateLimitKey::http("client-a", "demo", None);
        store
            .check_and_consume(&key, RateLimitAlgorithm::FixedWindow, limit(), 0)
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        store.cleanup_expired_entries(2 * 60 * 1000 + 1);
        assert_eq!(store.len(), 0);
    }
}
