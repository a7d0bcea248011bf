//! Session store and downstream token issuer (spec §4.7).

pub mod manager;
pub mod token;

pub use manager::{
    InMemorySessionRepository, SessionEvent, SessionEventListener, SessionManager, SessionRepository,
};
pub use token::{IncludeClaims, TokenIssuer, TokenIssuerConfig};
