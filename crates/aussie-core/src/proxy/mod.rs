//! Reverse proxy dispatch: HTTP request forwarding and WebSocket bridging
//! (spec §4.5, §4.6).

pub mod http;
pub mod websocket;

pub use http::{resolve_operation_name, HttpProxy, ProxyConfig};
pub use websocket::{bridge, MessageRateLimiter, WebSocketConfig};
