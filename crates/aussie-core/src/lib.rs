//! Request-processing core for the Aussie API gateway.
//!
//! This crate holds everything that runs between a request landing on the
//! listener socket and a response leaving it: the service registry and route
//! matcher, the rate limiter, the authentication and authorization stages,
//! the session store and token issuer, and the reverse proxy itself (HTTP and
//! WebSocket). The composition root (the `aussie-gateway` binary) wires these
//! pieces into an `actix-web` `HttpServer`.

pub mod auth;
pub mod authz;
pub mod config;
pub mod logs;
pub mod models;
pub mod pipeline;
pub mod proxy;
pub mod ratelimit;
pub mod registry;
pub mod session;
pub mod utils;

pub use models::error::{AussieError, AussieResult};
