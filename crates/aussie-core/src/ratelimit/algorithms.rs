//! Pure rate-limit algorithms: `(state, limit, now_ms) -> (decision, next_state)`.
//! Generalizes the teacher's `check_fixed_window`/`check_sliding_window`/
//! `check_token_bucket` methods (`middleware/rate_limit.rs`) out of the
//! Actix middleware and into standalone functions the store can call with
//! whatever state it loaded.

use serde::{Deserialize, Serialize};

use crate::models::rate_limit::{EffectiveRateLimit, RateLimitDecision, RateLimitState};

/// Platform-selected algorithm (spec §4.2 — chosen once at platform config
/// time, not per-service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitAlgorithm {
    TokenBucket,
    FixedWindow,
    SlidingWindow,
}

impl Default for RateLimitAlgorithm {
    fn default() -> Self {
        Self::TokenBucket
    }
}

pub fn initial_state(algorithm: RateLimitAlgorithm, limit: EffectiveRateLimit, now_ms: i64) -> RateLimitState {
    match algorithm {
        RateLimitAlgorithm::TokenBucket => RateLimitState::TokenBucket {
            tokens: limit.burst_capacity as f64,
            last_refill_ms: now_ms,
        },
        RateLimitAlgorithm::FixedWindow => RateLimitState::FixedWindow {
            count: 0,
            window_start_ms: now_ms,
        },
        RateLimitAlgorithm::SlidingWindow => RateLimitState::SlidingWindow {
            previous_count: 0,
            current_count: 0,
            current_window_start_ms: now_ms,
        },
    }
}

/// Applies refill/decay and attempts to consume one unit, returning the
/// decision and the state to persist back.
pub fn check_and_consume(
    state: RateLimitState,
    limit: EffectiveRateLimit,
    now_ms: i64,
) -> (RateLimitDecision, RateLimitState) {
    match state {
        RateLimitState::TokenBucket { tokens, last_refill_ms } => {
            check_token_bucket(tokens, last_refill_ms, limit, now_ms)
        }
        RateLimitState::FixedWindow { count, window_start_ms } => {
            check_fixed_window(count, window_start_ms, limit, now_ms)
        }
        RateLimitState::SlidingWindow {
            previous_count,
            current_count,
            current_window_start_ms,
        } => check_sliding_window(previous_count, current_count, current_window_start_ms, limit, now_ms),
    }
}

fn check_token_bucket(
    tokens: f64,
    last_refill_ms: i64,
    limit: EffectiveRateLimit,
    now_ms: i64,
) -> (RateLimitDecision, RateLimitState) {
    let elapsed_secs = (now_ms - last_refill_ms).max(0) as f64 / 1000.0;
    let rate = limit.requests_per_window as f64 / limit.window_seconds.max(1) as f64;
    let refilled = (tokens + elapsed_secs * rate).min(limit.burst_capacity as f64);

    let reset_at_secs = (now_ms / 1000) as u64 + limit.window_seconds;
    if refilled >= 1.0 {
        let remaining_tokens = refilled - 1.0;
        (
            RateLimitDecision::Allow {
                remaining: remaining_tokens.floor() as u64,
                reset_at_secs,
            },
            RateLimitState::TokenBucket {
                tokens: remaining_tokens,
                last_refill_ms: now_ms,
            },
        )
    } else {
        let deficit = 1.0 - refilled;
        let retry_after_secs = (deficit / rate.max(f64::MIN_POSITIVE)).ceil().max(1.0) as u64;
        (
            RateLimitDecision::Reject {
                limit: limit.requests_per_window,
                retry_after_secs,
                reset_at_secs,
                request_count: limit.burst_capacity,
            },
            RateLimitState::TokenBucket {
                tokens: refilled,
                last_refill_ms: now_ms,
            },
        )
    }
}

fn check_fixed_window(
    count: u64,
    window_start_ms: i64,
    limit: EffectiveRateLimit,
    now_ms: i64,
) -> (RateLimitDecision, RateLimitState) {
    let window_ms = (limit.window_seconds.max(1) as i64) * 1000;
    let elapsed = now_ms - window_start_ms;

    let (count, window_start_ms) = if elapsed >= window_ms {
        // Window elapsed: counter resets at the boundary (spec §4.2 table).
        (0, now_ms)
    } else {
        (count, window_start_ms)
    };

    let reset_at_secs = ((window_start_ms + window_ms) / 1000) as u64;
    if count < limit.requests_per_window {
        (
            RateLimitDecision::Allow {
                remaining: limit.requests_per_window - count - 1,
                reset_at_secs,
            },
            RateLimitState::FixedWindow {
                count: count + 1,
                window_start_ms,
            },
        )
    } else {
        let retry_after_secs = ((window_start_ms + window_ms - now_ms).max(1000) / 1000) as u64;
        (
            RateLimitDecision::Reject {
                limit: limit.requests_per_window,
                retry_after_secs,
                reset_at_secs,
                request_count: count,
            },
            RateLimitState::FixedWindow { count, window_start_ms },
        )
    }
}

fn check_sliding_window(
    previous_count: u64,
    current_count: u64,
    current_window_start_ms: i64,
    limit: EffectiveRateLimit,
    now_ms: i64,
) -> (RateLimitDecision, RateLimitState) {
    let window_ms = (limit.window_seconds.max(1) as i64) * 1000;
    let elapsed = now_ms - current_window_start_ms;

    let (previous_count, current_count, current_window_start_ms) = if elapsed >= 2 * window_ms {
        (0, 0, now_ms)
    } else if elapsed >= window_ms {
        (current_count, 0, current_window_start_ms + window_ms)
    } else {
        (previous_count, current_count, current_window_start_ms)
    };

    let progress = ((now_ms - current_window_start_ms).max(0) as f64 / window_ms as f64).min(1.0);
    let weighted = previous_count as f64 * (1.0 - progress) + current_count as f64;
    let reset_at_secs = ((current_window_start_ms + window_ms) / 1000) as u64;

    if weighted < limit.requests_per_window as f64 {
        (
            RateLimitDecision::Allow {
                remaining: (limit.requests_per_window as f64 - weighted - 1.0).max(0.0) as u64,
                reset_at_secs,
            },
            RateLimitState::SlidingWindow {
                previous_count,
                current_count: current_count + 1,
                current_window_start_ms,
            },
        )
    } else {
        let retry_after_secs = ((current_window_start_ms + window_ms - now_ms).max(1000) / 1000) as u64;
        (
            RateLimitDecision::Reject {
                limit: limit.requests_per_window,
                retry_after_secs,
                reset_at_secs,
                request_count: weighted as u64,
            },
            RateLimitState::SlidingWindow {
                previous_count,
                current_count,
                current_window_start_ms,
            },
        )
    }
}
