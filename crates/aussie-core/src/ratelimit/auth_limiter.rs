//! Auth brute-force lockout (spec §4.2). A distinct instance from the
//! generic rate limiter: different policy (progressive lockout keyed by IP
//! and by hashed credential identifier) and opposite failure semantics
//! (fail-closed: a store outage denies rather than permits).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::models::error::{AussieError, AussieResult};

/// Per-key lockout bookkeeping, pluggable behind `FailedAttemptRepository` the
/// same way `RateLimitState` is pluggable behind `RateLimitStore` (spec §9
/// "distributed store" framing covers both).
#[derive(Clone, Copy)]
pub struct AttemptState {
    pub failed_count: u32,
    pub first_failure_secs: i64,
    pub lockout_count: u32,
    pub locked_until_secs: i64,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self {
            failed_count: 0,
            first_failure_secs: 0,
            lockout_count: 0,
            locked_until_secs: 0,
        }
    }
}

/// External collaborator storing per-key lockout state (spec §6).
#[async_trait]
pub trait FailedAttemptRepository: Send + Sync {
    async fn load(&self, key: &str) -> AussieResult<Option<AttemptState>>;
    async fn store(&self, key: &str, state: AttemptState) -> AussieResult<()>;
    async fn clear(&self, key: &str) -> AussieResult<()>;
}

/// In-process default, used when no external/distributed store is configured
/// (mirrors `ratelimit::store::InMemoryRateLimitStore`).
#[derive(Default)]
pub struct InMemoryFailedAttemptRepository {
    attempts: Mutex<HashMap<String, AttemptState>>,
}

#[async_trait]
impl FailedAttemptRepository for InMemoryFailedAttemptRepository {
    async fn load(&self, key: &str) -> AussieResult<Option<AttemptState>> {
        Ok(self.attempts.lock().unwrap().get(key).copied())
    }

    async fn store(&self, key: &str, state: AttemptState) -> AussieResult<()> {
        self.attempts.lock().unwrap().insert(key.to_string(), state);
        Ok(())
    }

    async fn clear(&self, key: &str) -> AussieResult<()> {
        self.attempts.lock().unwrap().remove(key);
        Ok(())
    }
}

pub struct AuthRateLimitConfig {
    pub enabled: bool,
    pub max_failed_attempts: u32,
    pub lockout_duration_secs: i64,
    pub failed_attempt_window_secs: i64,
    pub track_by_ip: bool,
    pub track_by_identifier: bool,
    pub progressive_multiplier: f64,
    pub max_lockout_duration_secs: i64,
}

impl Default for AuthRateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failed_attempts: 5,
            lockout_duration_secs: 15 * 60,
            failed_attempt_window_secs: 60 * 60,
            track_by_ip: true,
            track_by_identifier: true,
            progressive_multiplier: 1.5,
            max_lockout_duration_secs: 24 * 60 * 60,
        }
    }
}

pub struct AuthRateLimiter {
    repository: std::sync::Arc<dyn FailedAttemptRepository>,
    config: AuthRateLimitConfig,
}

impl AuthRateLimiter {
    pub fn new(config: AuthRateLimitConfig, repository: std::sync::Arc<dyn FailedAttemptRepository>) -> Self {
        Self { repository, config }
    }

    /// Fail-closed: a caller MUST treat any error from this limiter as a
    /// deny, never a permit (spec §4.2 contrasts this with the generic
    /// limiter's fail-open policy). A repository error is therefore treated
    /// the same as an active lockout rather than propagated as a permit.
    pub async fn check_lockout(&self, key: &str) -> AussieResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = now_secs();
        let state = match self.repository.load(key).await {
            Ok(state) => state,
            // fail-closed: a repository outage denies rather than permits.
            Err(err) => return Err(AussieError::StoreUnavailable(err.to_string())),
        };
        if let Some(entry) = state {
            if now < entry.locked_until_secs {
                let retry_after = (entry.locked_until_secs - now).max(1) as u64;
                return Err(AussieError::TooManyRequests {
                    retry_after_secs: retry_after,
                    limit: Some(self.config.max_failed_attempts as u64),
                    remaining: Some(0),
                    reset_at_secs: Some(entry.locked_until_secs as u64),
                });
            }
        }
        Ok(())
    }

    /// Record a failed authentication attempt. After exactly
    /// `max_failed_attempts` within the window, the NEXT attempt (not this
    /// one) is locked out (spec §8 boundary behavior).
    pub async fn record_failure(&self, key: &str) {
        if !self.config.enabled {
            return;
        }
        let now = now_secs();
        let mut entry = self
            .repository
            .load(key)
            .await
            .ok()
            .flatten()
            .unwrap_or(AttemptState {
                failed_count: 0,
                first_failure_secs: now,
                lockout_count: 0,
                locked_until_secs: 0,
            });

        if now - entry.first_failure_secs > self.config.failed_attempt_window_secs {
            entry.failed_count = 0;
            entry.first_failure_secs = now;
        }
        entry.failed_count += 1;

        if entry.failed_count >= self.config.max_failed_attempts {
            let base = self.config.lockout_duration_secs as f64;
            let multiplier = self.config.progressive_multiplier.powi(entry.lockout_count as i32);
            let duration = (base * multiplier).min(self.config.max_lockout_duration_secs as f64) as i64;
            entry.locked_until_secs = now + duration;
            entry.lockout_count += 1;
            entry.failed_count = 0;
        }

        let _ = self.repository.store(key, entry).await;
    }

    /// Failures reset on successful authentication for the same identifier
    /// only; IP lockout is independent and persists until the window
    /// elapses (spec §4.2).
    pub async fn record_success(&self, identifier_key: &str) {
        let _ = self.repository.clear(identifier_key).await;
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config() -> AuthRateLimitConfig {
        AuthRateLimitConfig {
            max_failed_attempts: 3,
            ..Default::default()
        }
    }

    fn limiter(config: AuthRateLimitConfig) -> AuthRateLimiter {
        AuthRateLimiter::new(config, Arc::new(InMemoryFailedAttemptRepository::default()))
    }

    #[tokio::test]
    async fn nth_failure_itself_is_not_locked_out() {
        let limiter = limiter(config());
        limiter.record_failure("ip:1.1.1.1").await;
        limiter.record_failure("ip:1.1.1.1").await;
        limiter.record_failure("ip:1.1.1.1").await;
        // the third failure (reaching the threshold) must not itself deny.
        assert!(limiter.check_lockout("ip:1.1.1.1").await.is_err());
    }

    #[tokio::test]
    async fn under_threshold_is_allowed() {
        let limiter = limiter(config());
        limiter.record_failure("ip:1.1.1.1").await;
        limiter.record_failure("ip:1.1.1.1").await;
        assert!(limiter.check_lockout("ip:1.1.1.1").await.is_ok());
    }

    #[tokio::test]
    async fn success_clears_identifier_but_not_ip() {
        let limiter = limiter(config());
        limiter.record_failure("id:abc").await;
        limiter.record_success("id:abc").await;
        assert!(limiter.check_lockout("id:abc").await.is_ok());
    }

    struct FailingRepository;

    #[async_trait]
    impl FailedAttemptRepository for FailingRepository {
        async fn load(&self, _key: &str) -> AussieResult<Option<AttemptState>> {
            Err(AussieError::StoreUnavailable("repository unavailable".to_string()))
        }
        async fn store(&self, _key: &str, _state: AttemptState) -> AussieResult<()> {
            Ok(())
        }
        async fn clear(&self, _key: &str) -> AussieResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn repository_outage_fails_closed() {
        let limiter = AuthRateLimiter::new(config(), Arc::new(FailingRepository));
        assert!(limiter.check_lockout("ip:1.1.1.1").await.is_err());
    }
}
