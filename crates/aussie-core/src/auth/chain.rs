//! Mechanism chain with priority ordering (spec §4.3). Built once, at
//! startup, with the dev-mode noop mechanism prepended when enabled — never
//! gated on a process-wide flag checked per request (spec §9).

use crate::models::error::AussieError;
use crate::models::identity::Identity;

use super::{AuthMechanism, AuthOutcome, AuthRequestContext};

pub struct AuthChain {
    mechanisms: Vec<Box<dyn AuthMechanism>>,
    sessions_enabled: bool,
}

impl AuthChain {
    pub fn new(mut mechanisms: Vec<Box<dyn AuthMechanism>>, sessions_enabled: bool) -> Self {
        mechanisms.sort_by_key(|m| m.priority());
        Self {
            mechanisms,
            sessions_enabled,
        }
    }

    /// Runs the chain to completion: conflicting-auth pre-check, then each
    /// mechanism in priority order, first non-`Skip` result wins.
    pub async fn authenticate(&self, ctx: &AuthRequestContext) -> Result<Option<Identity>, AussieError> {
        if self.sessions_enabled
            && ctx.authorization_header.is_some()
            && ctx.session_cookie_value.is_some()
        {
            return Err(AussieError::ConflictingAuthentication);
        }

        for mechanism in &self.mechanisms {
            match mechanism.authenticate(ctx).await {
                AuthOutcome::Skip => continue,
                AuthOutcome::Authenticated(identity) => return Ok(Some(identity)),
                AuthOutcome::Failed(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysSkip;
    #[async_trait]
    impl AuthMechanism for AlwaysSkip {
        fn priority(&self) -> i32 {
            10
        }
        async fn authenticate(&self, _ctx: &AuthRequestContext) -> AuthOutcome {
            AuthOutcome::Skip
        }
    }

    struct AlwaysAuth;
    #[async_trait]
    impl AuthMechanism for AlwaysAuth {
        fn priority(&self) -> i32 {
            20
        }
        async fn authenticate(&self, _ctx: &AuthRequestContext) -> AuthOutcome {
            AuthOutcome::Authenticated(Identity::dev_noop())
        }
    }

    #[tokio::test]
    async fn falls_through_skip_to_next_mechanism() {
        let chain = AuthChain::new(vec![Box::new(AlwaysSkip), Box::new(AlwaysAuth)], true);
        let ctx = AuthRequestContext {
            authorization_header: None,
            session_cookie_value: None,
        };
        let result = chain.authenticate(&ctx).await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn both_header_and_cookie_conflicts() {
        let chain = AuthChain::new(vec![Box::new(AlwaysAuth)], true);
        let ctx = AuthRequestContext {
            authorization_header: Some("Bearer aussie_x".to_string()),
            session_cookie_value: Some("abc".to_string()),
        };
        let result = chain.authenticate(&ctx).await;
        assert!(matches!(result, Err(AussieError::ConflictingAuthentication)));
    }
}
