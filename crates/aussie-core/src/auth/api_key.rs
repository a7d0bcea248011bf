//! Mechanism 1 (highest priority): `Authorization: Bearer aussie_<token>`
//! (spec §4.3). Grounded on the teacher's `JwtAuth`/`JwtAuthMiddleware` shape
//! (`src/middleware/auth.rs`) but looks up a hashed key instead of decoding
//! a signed token.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::api_key::{ApiKey, API_KEY_PREFIX};
use crate::models::error::AussieError;
use crate::models::identity::{Identity, IdentityAttributes};

use super::{AuthMechanism, AuthOutcome, AuthRequestContext};

/// External collaborator: CRUD plus hash lookup (spec §6 `ApiKeyRepository`).
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn find_by_hash(&self, key_hash: &str) -> Option<ApiKey>;
}

/// In-process default, used when no external key store is configured
/// (mirrors `registry::InMemoryServiceRepository` and
/// `session::InMemorySessionRepository`).
#[derive(Default)]
pub struct InMemoryApiKeyRepository {
    by_hash: std::sync::RwLock<std::collections::HashMap<String, ApiKey>>,
}

impl InMemoryApiKeyRepository {
    pub fn insert(&self, key: ApiKey) {
        self.by_hash.write().unwrap().insert(key.key_hash.clone(), key);
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn find_by_hash(&self, key_hash: &str) -> Option<ApiKey> {
        self.by_hash.read().unwrap().get(key_hash).cloned()
    }
}

pub struct ApiKeyMechanism {
    repository: Arc<dyn ApiKeyRepository>,
}

impl ApiKeyMechanism {
    pub fn new(repository: Arc<dyn ApiKeyRepository>) -> Self {
        Self { repository }
    }

    fn extract_token(ctx: &AuthRequestContext) -> Option<&str> {
        ctx.authorization_header
            .as_deref()
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim())
    }
}

#[async_trait]
impl AuthMechanism for ApiKeyMechanism {
    fn priority(&self) -> i32 {
        10
    }

    async fn authenticate(&self, ctx: &AuthRequestContext) -> AuthOutcome {
        let Some(token) = Self::extract_token(ctx) else {
            return AuthOutcome::Skip;
        };
        if !token.starts_with(API_KEY_PREFIX) {
            // Not our prefix: this is a JWT candidate, not ours to handle.
            return AuthOutcome::Skip;
        }

        let hash = ApiKey::hash_plaintext(token);
        let Some(key) = self.repository.find_by_hash(&hash).await else {
            return AuthOutcome::Failed(AussieError::Unauthorized("unknown API key".to_string()));
        };

        if !key.is_valid(Utc::now()) {
            return AuthOutcome::Failed(AussieError::Unauthorized(
                "API key is revoked or expired".to_string(),
            ));
        }

        let attributes = IdentityAttributes {
            key_id: Some(key.id.clone()),
            ..Default::default()
        };
        AuthOutcome::Authenticated(Identity::from_permissions(
            key.id.clone(),
            key.name.clone(),
            key.permissions.clone(),
            attributes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FakeRepo(Option<ApiKey>);

    #[async_trait]
    impl ApiKeyRepository for FakeRepo {
        async fn find_by_hash(&self, _key_hash: &str) -> Option<ApiKey> {
            self.0.clone()
        }
    }

    fn sample_key() -> ApiKey {
        let mut permissions = HashSet::new();
        permissions.insert("demo.read".to_string());
        ApiKey {
            id: "key-1".to_string(),
            key_hash: ApiKey::hash_plaintext("aussie_TESTKEY"),
            name: "test key".to_string(),
            permissions,
            created_at: Utc::now(),
            expires_at: None,
            revoked: false,
        }
    }

    #[tokio::test]
    async fn valid_key_authenticates() {
        let mechanism = ApiKeyMechanism::new(Arc::new(FakeRepo(Some(sample_key()))));
        let ctx = AuthRequestContext {
            authorization_header: Some("Bearer aussie_TESTKEY".to_string()),
            session_cookie_value: None,
        };
        match mechanism.authenticate(&ctx).await {
            AuthOutcome::Authenticated(identity) => assert_eq!(identity.name, "test key"),
            other => panic!("expected Authenticated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_prefixed_token_skips() {
        let mechanism = ApiKeyMechanism::new(Arc::new(FakeRepo(None)));
        let ctx = AuthRequestContext {
            authorization_header: Some("Bearer some.jwt.token".to_string()),
            session_cookie_value: None,
        };
        assert!(matches!(mechanism.authenticate(&ctx).await, AuthOutcome::Skip));
    }

    #[tokio::test]
    async fn revoked_key_fails() {
        let mut key = sample_key();
        key.revoked = true;
        let mechanism = ApiKeyMechanism::new(Arc::new(FakeRepo(Some(key))));
        let ctx = AuthRequestContext {
            authorization_header: Some("Bearer aussie_TESTKEY".to_string()),
            session_cookie_value: None,
        };
        assert!(matches!(
            mechanism.authenticate(&ctx).await,
            AuthOutcome::Failed(_)
        ));
    }
}
