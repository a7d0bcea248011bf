use serde::{Deserialize, Serialize};

/// The three shapes of rate-limited traffic (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateLimitKeyKind {
    Http,
    WsConnection,
    WsMessage,
}

impl RateLimitKeyKind {
    fn as_str(&self) -> &'static str {
        match self {
            RateLimitKeyKind::Http => "HTTP",
            RateLimitKeyKind::WsConnection => "WS_CONNECTION",
            RateLimitKeyKind::WsMessage => "WS_MESSAGE",
        }
    }
}

/// Identifies a single rate-limit bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub kind: RateLimitKeyKind,
    pub client_id: String,
    pub service_id: String,
    pub endpoint_id: Option<String>,
    pub connection_id: Option<String>,
}

impl RateLimitKey {
    pub fn http(client_id: impl Into<String>, service_id: impl Into<String>, endpoint_id: Option<String>) -> Self {
        Self {
            kind: RateLimitKeyKind::Http,
            client_id: client_id.into(),
            service_id: service_id.into(),
            endpoint_id,
            connection_id: None,
        }
    }

    pub fn ws_connection(client_id: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            kind: RateLimitKeyKind::WsConnection,
            client_id: client_id.into(),
            service_id: service_id.into(),
            endpoint_id: None,
            connection_id: None,
        }
    }

    pub fn ws_message(
        client_id: impl Into<String>,
        service_id: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: RateLimitKeyKind::WsMessage,
            client_id: client_id.into(),
            service_id: service_id.into(),
            endpoint_id: None,
            connection_id: Some(connection_id.into()),
        }
    }

    /// `aussie:ratelimit:<type>:<serviceId>:<endpointId|->:<clientId>[:<connectionId>]`
    pub fn canonical(&self) -> String {
        let endpoint_part = self.endpoint_id.as_deref().unwrap_or("-");
        let mut key = format!(
            "aussie:ratelimit:{}:{}:{}:{}",
            self.kind.as_str(),
            self.service_id,
            endpoint_part,
            self.client_id
        );
        if let Some(conn) = &self.connection_id {
            key.push(':');
            key.push_str(conn);
        }
        key
    }
}

/// Algorithm-specific state persisted per key (spec §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum RateLimitState {
    TokenBucket { tokens: f64, last_refill_ms: i64 },
    FixedWindow { count: u64, window_start_ms: i64 },
    SlidingWindow {
        previous_count: u64,
        current_count: u64,
        current_window_start_ms: i64,
    },
}

/// Resolved `(requests, window, burst)` after endpoint > service > platform
/// precedence and platform clamping (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveRateLimit {
    pub requests_per_window: u64,
    pub window_seconds: u64,
    pub burst_capacity: u64,
}

impl EffectiveRateLimit {
    pub fn clamp(self, floor: u64, ceiling: u64) -> Self {
        Self {
            requests_per_window: self.requests_per_window.clamp(floor, ceiling),
            ..self
        }
    }
}

/// Outcome of a `checkAndConsume` call (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow {
        remaining: u64,
        reset_at_secs: u64,
    },
    Reject {
        limit: u64,
        retry_after_secs: u64,
        reset_at_secs: u64,
        request_count: u64,
    },
}
