use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sentinel that replaces `key_hash` in a redacted view (spec §3).
pub const REDACTED_HASH_SENTINEL: &str = "***redacted***";

/// Prefix every plaintext API key must carry to be considered by the
/// API-key authentication mechanism (spec §4.3).
pub const API_KEY_PREFIX: &str = "aussie_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub key_hash: String,
    pub name: String,
    pub permissions: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl ApiKey {
    pub fn hash_plaintext(plaintext: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(plaintext.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// `is_valid = !revoked && (expires_at == None || now < expires_at)`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        match self.expires_at {
            Some(expiry) => now < expiry,
            None => true,
        }
    }

    /// Constant-time-equivalent validation: recompute the hash of the
    /// supplied plaintext and compare against the stored hash.
    pub fn matches_plaintext(&self, plaintext: &str) -> bool {
        Self::hash_plaintext(plaintext) == self.key_hash
    }

    pub fn redacted(&self) -> ApiKey {
        ApiKey {
            key_hash: REDACTED_HASH_SENTINEL.to_string(),
            ..self.clone()
        }
    }
}
