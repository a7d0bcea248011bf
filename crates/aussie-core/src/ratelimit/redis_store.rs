//! Distributed `RateLimitStore` backed by Redis, gated behind the `redis`
//! feature (see DESIGN.md — grounded on `penserai-acteon/acteon-state-redis`
//! and the wider pack's rate-limit-over-redis examples). The load-refill-store
//! cycle runs as a single Lua script invoked via `EVAL`/`EVALSHA` (spec §4.2
//! "Lua script over a KV store"), so two instances racing on the same key
//! never both observe the pre-consumption state — the algorithm itself runs
//! on the Redis server, not round-tripped through this client.
#![cfg(feature = "redis")]

use async_trait::async_trait;
use redis::Script;

use crate::models::rate_limit::{EffectiveRateLimit, RateLimitDecision, RateLimitKey};
use crate::ratelimit::algorithms::RateLimitAlgorithm;

use super::store::{RateLimitStore, StoreError};

/// Mirrors `ratelimit::algorithms::check_and_consume` server-side so the
/// read-modify-write is a single atomic Redis command. State is stored as a
/// compact `tag|field|field...` string private to this module, not the
/// `RateLimitState` JSON the in-memory store uses.
const CHECK_AND_CONSUME_SCRIPT: &str = r#"
local key = KEYS[1]
local algorithm = ARGV[1]
local requests_per_window = tonumber(ARGV[2])
local window_seconds = math.max(tonumber(ARGV[3]), 1)
local burst_capacity = tonumber(ARGV[4])
local now_ms = tonumber(ARGV[5])
local ttl_secs = tonumber(ARGV[6])

local raw = redis.call('GET', key)
local parts = {}
if raw then
  for part in string.gmatch(raw, "[^|]+") do
    table.insert(parts, part)
  end
end

local allowed, remaining, reset_at_secs, retry_after_secs, request_count, new_state

if algorithm == 'TOKEN_BUCKET' then
  local tokens, last_refill_ms
  if parts[1] == 'TB' then
    tokens = tonumber(parts[2])
    last_refill_ms = tonumber(parts[3])
  else
    tokens = burst_capacity
    last_refill_ms = now_ms
  end
  local elapsed_secs = math.max(now_ms - last_refill_ms, 0) / 1000.0
  local rate = requests_per_window / window_seconds
  local refilled = math.min(tokens + elapsed_secs * rate, burst_capacity)
  reset_at_secs = math.floor(now_ms / 1000) + window_seconds
  if refilled >= 1.0 then
    local remaining_tokens = refilled - 1.0
    allowed = 1
    remaining = math.floor(remaining_tokens)
    retry_after_secs = 0
    request_count = math.floor(burst_capacity)
    new_state = string.format("TB|%.6f|%d", remaining_tokens, now_ms)
  else
    local deficit = 1.0 - refilled
    allowed = 0
    remaining = 0
    retry_after_secs = math.max(math.ceil(deficit / math.max(rate, 1e-9)), 1)
    request_count = math.floor(burst_capacity)
    new_state = string.format("TB|%.6f|%d", refilled, now_ms)
  end

elseif algorithm == 'FIXED_WINDOW' then
  local count, window_start_ms
  if parts[1] == 'FW' then
    count = tonumber(parts[2])
    window_start_ms = tonumber(parts[3])
  else
    count = 0
    window_start_ms = now_ms
  end
  local window_ms = window_seconds * 1000
  if now_ms - window_start_ms >= window_ms then
    count = 0
    window_start_ms = now_ms
  end
  reset_at_secs = math.floor((window_start_ms + window_ms) / 1000)
  if count < requests_per_window then
    allowed = 1
    remaining = requests_per_window - count - 1
    retry_after_secs = 0
    request_count = count + 1
    new_state = string.format("FW|%d|%d", count + 1, window_start_ms)
  else
    allowed = 0
    remaining = 0
    retry_after_secs = math.max(math.floor((window_start_ms + window_ms - now_ms) / 1000), 1)
    request_count = count
    new_state = string.format("FW|%d|%d", count, window_start_ms)
  end

else
  local previous_count, current_count, current_window_start_ms
  if parts[1] == 'SW' then
    previous_count = tonumber(parts[2])
    current_count = tonumber(parts[3])
    current_window_start_ms = tonumber(parts[4])
  else
    previous_count = 0
    current_count = 0
    current_window_start_ms = now_ms
  end
  local window_ms = window_seconds * 1000
  local elapsed = now_ms - current_window_start_ms
  if elapsed >= 2 * window_ms then
    previous_count = 0
    current_count = 0
    current_window_start_ms = now_ms
  elseif elapsed >= window_ms then
    previous_count = current_count
    current_count = 0
    current_window_start_ms = current_window_start_ms + window_ms
  end
  local progress = math.min(math.max(now_ms - current_window_start_ms, 0) / window_ms, 1.0)
  local weighted = previous_count * (1.0 - progress) + current_count
  reset_at_secs = math.floor((current_window_start_ms + window_ms) / 1000)
  if weighted < requests_per_window then
    allowed = 1
    remaining = math.max(math.floor(requests_per_window - weighted - 1.0), 0)
    retry_after_secs = 0
    request_count = math.floor(weighted)
    new_state = string.format("SW|%d|%d|%d", previous_count, current_count + 1, current_window_start_ms)
  else
    allowed = 0
    remaining = 0
    retry_after_secs = math.max(math.floor((current_window_start_ms + window_ms - now_ms) / 1000), 1)
    request_count = math.floor(weighted)
    new_state = string.format("SW|%d|%d|%d", previous_count, current_count, current_window_start_ms)
  end
end

redis.call('SET', key, new_state, 'EX', ttl_secs)
return {allowed, remaining, reset_at_secs, retry_after_secs, request_count}
"#;

pub struct RedisRateLimitStore {
    client: redis::Client,
    script: Script,
}

impl RedisRateLimitStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(|e| StoreError(e.to_string()))?;
        Ok(Self {
            client,
            script: Script::new(CHECK_AND_CONSUME_SCRIPT),
        })
    }

    fn algorithm_tag(algorithm: RateLimitAlgorithm) -> &'static str {
        match algorithm {
            RateLimitAlgorithm::TokenBucket => "TOKEN_BUCKET",
            RateLimitAlgorithm::FixedWindow => "FIXED_WINDOW",
            RateLimitAlgorithm::SlidingWindow => "SLIDING_WINDOW",
        }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn check_and_consume(
        &self,
        key: &RateLimitKey,
        algorithm: RateLimitAlgorithm,
        limit: EffectiveRateLimit,
        now_ms: i64,
    ) -> Result<RateLimitDecision, StoreError> {
        let canonical = key.canonical();
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError(e.to_string()))?;

        let ttl_secs = (2 * limit.window_seconds).max(1);
        let result: Vec<i64> = self
            .script
            .key(&canonical)
            .arg(Self::algorithm_tag(algorithm))
            .arg(limit.requests_per_window)
            .arg(limit.window_seconds)
            .arg(limit.burst_capacity)
            .arg(now_ms)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError(e.to_string()))?;

        let [allowed, remaining, reset_at_secs, retry_after_secs, request_count] = result[..] else {
            return Err(StoreError(
                "unexpected shape returned by rate limit script".to_string(),
            ));
        };

        Ok(if allowed == 1 {
            RateLimitDecision::Allow {
                remaining: remaining.max(0) as u64,
                reset_at_secs: reset_at_secs.max(0) as u64,
            }
        } else {
            RateLimitDecision::Reject {
                limit: limit.requests_per_window,
                retry_after_secs: retry_after_secs.max(1) as u64,
                reset_at_secs: reset_at_secs.max(0) as u64,
                request_count: request_count.max(0) as u64,
            }
        })
    }
}
