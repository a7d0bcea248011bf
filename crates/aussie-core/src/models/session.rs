use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A browser/client session, owned by the session store (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// 256-bit URL-safe base64, 43 chars.
    pub id: String,
    pub user_id: String,
    pub issuer: String,
    pub claims: HashMap<String, serde_json::Value>,
    pub permissions: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl Session {
    /// Valid iff `now < expires_at && now - last_accessed_at < idle_timeout`.
    pub fn is_valid(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        now < self.expires_at && (now - self.last_accessed_at) < idle_timeout
    }

    /// Sliding expiration refresh: bump `last_accessed_at`, and if enabled,
    /// push `expires_at` out to `now + ttl` too.
    pub fn refresh(&mut self, now: DateTime<Utc>, sliding_expiration: bool, ttl: Duration) {
        self.last_accessed_at = now;
        if sliding_expiration {
            self.expires_at = now + ttl;
        }
    }
}
