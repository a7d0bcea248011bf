//! Explicit dev-mode bypass (spec §4.3 exception, §6 `dangerousNoop`). Modeled
//! as a distinct chain member with the lowest priority rather than a runtime
//! flag branch checked inside every other mechanism (spec §9 "Global mutable
//! state for dev-mode noop") — when present in the chain it always wins, and
//! when absent (the default) it simply isn't built.

use async_trait::async_trait;

use crate::models::identity::Identity;

use super::{AuthMechanism, AuthOutcome, AuthRequestContext};

pub struct DevNoopMechanism;

#[async_trait]
impl AuthMechanism for DevNoopMechanism {
    fn priority(&self) -> i32 {
        -100
    }

    async fn authenticate(&self, _ctx: &AuthRequestContext) -> AuthOutcome {
        AuthOutcome::Authenticated(Identity::dev_noop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_authenticates_as_admin() {
        let mechanism = DevNoopMechanism;
        let ctx = AuthRequestContext {
            authorization_header: None,
            session_cookie_value: None,
        };
        match mechanism.authenticate(&ctx).await {
            AuthOutcome::Authenticated(identity) => assert!(identity.permissions.contains("*")),
            other => panic!("expected Authenticated, got {other:?}"),
        }
    }
}
