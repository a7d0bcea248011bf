//! Mechanism 2: session cookie lookup (spec §4.3). Missing/invalid sessions
//! `Skip` rather than `Fail`, deferring to the JWT mechanism.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::models::identity::{Identity, IdentityAttributes};
use crate::session::manager::SessionManager;

use super::{AuthMechanism, AuthOutcome, AuthRequestContext};

pub struct SessionCookieMechanism {
    manager: Arc<SessionManager>,
    idle_timeout: Duration,
    sliding_expiration: bool,
    ttl: Duration,
}

impl SessionCookieMechanism {
    pub fn new(
        manager: Arc<SessionManager>,
        idle_timeout: Duration,
        sliding_expiration: bool,
        ttl: Duration,
    ) -> Self {
        Self {
            manager,
            idle_timeout,
            sliding_expiration,
            ttl,
        }
    }
}

#[async_trait]
impl AuthMechanism for SessionCookieMechanism {
    fn priority(&self) -> i32 {
        20
    }

    async fn authenticate(&self, ctx: &AuthRequestContext) -> AuthOutcome {
        let Some(session_id) = &ctx.session_cookie_value else {
            return AuthOutcome::Skip;
        };

        let Some(mut session) = self.manager.find_by_id(session_id).await else {
            return AuthOutcome::Skip;
        };

        let now = Utc::now();
        if !session.is_valid(now, self.idle_timeout) {
            return AuthOutcome::Skip;
        }

        session.refresh(now, self.sliding_expiration, self.ttl);
        self.manager.update(session.clone()).await;

        let attributes = IdentityAttributes {
            session_id: Some(session.id.clone()),
            claims: session.claims.clone(),
            expires_at: Some(session.expires_at),
            ..Default::default()
        };
        AuthOutcome::Authenticated(Identity::from_permissions(
            session.user_id.clone(),
            session.user_id.clone(),
            session.permissions.clone(),
            attributes,
        ))
    }
}
