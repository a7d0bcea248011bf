//! Authentication: three mechanisms tried in priority order, unified into a
//! common identity model (spec §4.3).

pub mod api_key;
pub mod chain;
pub mod dev_noop;
pub mod jwt;
pub mod session_cookie;

use async_trait::async_trait;

use crate::models::error::AussieResult;
use crate::models::identity::Identity;

/// What a mechanism decided about this request. Mechanisms never fabricate
/// identities from anonymity (spec §4.3) — the only exception is the
/// dev-mode noop mechanism, modeled as a distinct chain member rather than a
/// runtime flag (spec §9 "Global mutable state for dev-mode noop").
#[derive(Debug)]
pub enum AuthOutcome {
    Authenticated(Identity),
    Skip,
    Failed(crate::models::error::AussieError),
}

/// Request data a mechanism needs, decoupled from `actix_web::HttpRequest`
/// so mechanisms stay unit-testable without building a real request.
pub struct AuthRequestContext {
    pub authorization_header: Option<String>,
    pub session_cookie_value: Option<String>,
}

#[async_trait]
pub trait AuthMechanism: Send + Sync {
    /// Lower returns earlier in the chain (spec §4.3 "Mechanism priorities").
    fn priority(&self) -> i32;
    async fn authenticate(&self, ctx: &AuthRequestContext) -> AuthOutcome;
}

pub use chain::AuthChain;

/// Convenience helper used by both production wiring and tests: raises
/// `Unauthorized` for a `Failed` outcome, passes `Authenticated` through.
pub fn outcome_to_result(outcome: AuthOutcome) -> AussieResult<Option<Identity>> {
    match outcome {
        AuthOutcome::Authenticated(identity) => Ok(Some(identity)),
        AuthOutcome::Skip => Ok(None),
        AuthOutcome::Failed(err) => Err(err),
    }
}
