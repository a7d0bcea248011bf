//! Downstream JWS minting (spec §4.7): a short-lived signed token placed on
//! an outbound header so proxied services need not consult the session
//! store themselves. Grounded on the teacher's `jsonwebtoken` usage in
//! `src/middleware/auth.rs`, here used to encode rather than decode.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::error::{AussieError, AussieResult};
use crate::models::session::Session;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundClaims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub sid: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IncludeClaims {
    pub roles: bool,
    pub permissions: bool,
    pub email: bool,
    pub name: bool,
}

pub struct TokenIssuerConfig {
    pub issuer: String,
    pub key_id: String,
    pub ttl: Duration,
    pub audience: Option<String>,
    pub include_claims: IncludeClaims,
    /// Upper bound no configured/clamped TTL may exceed (spec §4.7).
    pub global_max_ttl: Duration,
}

pub struct TokenIssuer {
    config: TokenIssuerConfig,
    encoding_key: EncodingKey,
}

impl TokenIssuer {
    pub fn new(config: TokenIssuerConfig, rsa_private_key_pem: &[u8]) -> AussieResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(rsa_private_key_pem)
            .map_err(|e| AussieError::StoreUnavailable(format!("invalid signing key: {e}")))?;
        Ok(Self { config, encoding_key })
    }

    /// Mints a token for the given session, with TTL clamped to the smaller
    /// of (configured TTL, incoming-token expiry, global max TTL).
    pub fn mint(&self, session: &Session, incoming_token_expiry: Option<DateTime<Utc>>) -> AussieResult<String> {
        let now = Utc::now();
        let configured_expiry = now + self.config.ttl;
        let max_expiry = now + self.config.global_max_ttl;

        let mut expiry = configured_expiry.min(max_expiry);
        if let Some(incoming) = incoming_token_expiry {
            expiry = expiry.min(incoming);
        }

        let roles: Vec<String> = if self.config.include_claims.roles {
            session
                .permissions
                .iter()
                .map(|p| crate::models::identity::permission_to_role(p))
                .collect::<HashSet<_>>()
                .into_iter()
                .collect()
        } else {
            Vec::new()
        };
        let permissions: Vec<String> = if self.config.include_claims.permissions {
            session.permissions.iter().cloned().collect()
        } else {
            Vec::new()
        };
        let email = if self.config.include_claims.email {
            session
                .claims
                .get("email")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        } else {
            None
        };
        let name = if self.config.include_claims.name {
            session
                .claims
                .get("name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        } else {
            None
        };

        let claims = OutboundClaims {
            iss: self.config.issuer.clone(),
            sub: session.user_id.clone(),
            iat: now.timestamp(),
            exp: expiry.timestamp(),
            jti: Uuid::new_v4().to_string(),
            aud: self.config.audience.clone(),
            sid: session.id.clone(),
            roles,
            permissions,
            email,
            name,
        };

        let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(self.config.key_id.clone());

        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| AussieError::StoreUnavailable(format!("failed to sign JWS: {e}")))
    }
}
