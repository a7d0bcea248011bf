//! WebSocket bridge (spec §4.6). Grounded on the teacher's `WebSocketHandler`
//! (`crates/kairos-rs/src/services/websocket.rs`) — `actix_ws::handle` on the
//! client side, `tokio_tungstenite::connect_async` on the backend side, two
//! forwarding loops — extended with the idle/max-lifetime/ping timers and
//! the single-`ProxySession`-owns-both-sockets lifecycle coupling the
//! teacher's fire-and-forget tasks don't have.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_ws::{CloseReason, Message as ClientMessage, MessageStream, Session as ClientSession};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as BackendCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as BackendCloseFrame;
use tokio_tungstenite::tungstenite::Message as BackendMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type BackendSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, BackendMessage>;

use crate::models::error::{AussieError, AussieResult};

pub struct WebSocketConfig {
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub ping_enabled: bool,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
            max_lifetime: Duration::from_secs(24 * 60 * 60),
            ping_enabled: true,
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

/// Why the bridge tore down, used to pick the close code/reason applied to
/// whichever side didn't initiate the close (spec §4.6).
#[derive(Debug, Clone, Copy)]
enum ClosureCause {
    ClientClosed,
    BackendClosed,
    ClientError,
    BackendError,
    IdleTimeout,
    MaxLifetime,
    PingTimeout,
    RateLimited,
}

impl ClosureCause {
    fn code_and_reason(self) -> (actix_ws::CloseCode, &'static str) {
        match self {
            ClosureCause::ClientClosed | ClosureCause::BackendClosed => {
                (actix_ws::CloseCode::Normal, "Closed")
            }
            ClosureCause::ClientError | ClosureCause::BackendError => {
                (actix_ws::CloseCode::Error, "Internal error")
            }
            ClosureCause::IdleTimeout => (actix_ws::CloseCode::Normal, "Idle timeout exceeded"),
            ClosureCause::MaxLifetime => {
                (actix_ws::CloseCode::Normal, "Max connection lifetime exceeded")
            }
            ClosureCause::PingTimeout => (actix_ws::CloseCode::Protocol, "Ping timeout"),
            // 4000-4999 is the application-defined range; `Library` is the
            // variant the close-code enum uses for it (spec §4.6 uses 4429
            // to echo HTTP 429).
            ClosureCause::RateLimited => (
                actix_ws::CloseCode::Library(4429),
                "Message rate limit exceeded",
            ),
        }
    }
}

/// Owns both sockets and guarantees the close happens exactly once
/// (spec §4.6 "Close is idempotent"). Closing one side without telling the
/// other would leave the backend (or the client) blocked on a read that
/// never completes, so `close_both` sends a translated Close frame to
/// `backend_sink` in addition to closing `client`.
struct ProxySession {
    client: ClientSession,
    backend_sink: tokio::sync::Mutex<BackendSink>,
    closed: AtomicBool,
}

impl ProxySession {
    async fn close_both(&self, cause: ClosureCause) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (code, reason) = cause.code_and_reason();
        debug!("closing websocket bridge: {reason}");

        let backend_frame = translate_close_to_backend(CloseReason {
            code,
            description: Some(reason.to_string()),
        });
        let mut backend_sink = self.backend_sink.lock().await;
        let _ = backend_sink.send(BackendMessage::Close(Some(backend_frame))).await;
        drop(backend_sink);

        let client_close = CloseReason {
            code,
            description: Some(reason.to_string()),
        };
        let _ = self.client.clone().close(Some(client_close)).await;
    }
}

/// A per-connection hook the rate limiter calls to check whether the next
/// inbound message is within budget (spec §4.6 message rate limit).
#[async_trait::async_trait]
pub trait MessageRateLimiter: Send + Sync {
    async fn allow_message(&self) -> bool;
}

/// Bridges an already-upgraded client session to a backend WebSocket
/// connection until either side closes or a timer fires.
pub async fn bridge(
    client_session: ClientSession,
    mut client_stream: MessageStream,
    backend_ws_url: String,
    config: WebSocketConfig,
    message_limiter: Option<Arc<dyn MessageRateLimiter>>,
) -> AussieResult<()> {
    let (backend_stream, _response) = tokio_tungstenite::connect_async(&backend_ws_url)
        .await
        .map_err(|e| AussieError::BadGateway(format!("backend websocket connect failed: {e}")))?;
    let (backend_sink, mut backend_source) = backend_stream.split();

    let session = Arc::new(ProxySession {
        client: client_session,
        backend_sink: tokio::sync::Mutex::new(backend_sink),
        closed: AtomicBool::new(false),
    });

    let deadline = Instant::now() + config.max_lifetime;
    let mut idle_deadline = Instant::now() + config.idle_timeout;
    let mut ping_ticker = interval(config.ping_interval);
    let mut awaiting_pong = false;
    let mut pong_deadline = Instant::now() + config.ping_timeout;

    loop {
        if session.closed.load(Ordering::SeqCst) {
            break;
        }

        tokio::select! {
            _ = sleep_until_absolute(deadline) => {
                session.close_both(ClosureCause::MaxLifetime).await;
                break;
            }
            _ = sleep_until_absolute(idle_deadline) => {
                session.close_both(ClosureCause::IdleTimeout).await;
                break;
            }
            _ = ping_ticker.tick(), if config.ping_enabled && !awaiting_pong => {
                if session.client.clone().ping(b"").await.is_err() {
                    session.close_both(ClosureCause::ClientError).await;
                    break;
                }
                awaiting_pong = true;
                pong_deadline = Instant::now() + config.ping_timeout;
            }
            _ = sleep_until_absolute(pong_deadline), if awaiting_pong => {
                session.close_both(ClosureCause::PingTimeout).await;
                break;
            }
            client_msg = client_stream.next() => {
                idle_deadline = Instant::now() + config.idle_timeout;
                match client_msg {
                    Some(Ok(ClientMessage::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(msg)) => {
                        if let Some(limiter) = &message_limiter {
                            if !limiter.allow_message().await {
                                session.close_both(ClosureCause::RateLimited).await;
                                break;
                            }
                        }
                        if forward_to_backend(&session, msg).await.is_err() {
                            session.close_both(ClosureCause::BackendError).await;
                            break;
                        }
                    }
                    Some(Err(_)) => {
                        session.close_both(ClosureCause::ClientError).await;
                        break;
                    }
                    None => {
                        session.close_both(ClosureCause::ClientClosed).await;
                        break;
                    }
                }
            }
            backend_msg = backend_source.next() => {
                idle_deadline = Instant::now() + config.idle_timeout;
                match backend_msg {
                    Some(Ok(msg)) => {
                        if forward_to_client(&session.client, msg).await.is_err() {
                            session.close_both(ClosureCause::ClientError).await;
                            break;
                        }
                    }
                    Some(Err(_)) => {
                        session.close_both(ClosureCause::BackendError).await;
                        break;
                    }
                    None => {
                        session.close_both(ClosureCause::BackendClosed).await;
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn sleep_until_absolute(instant: Instant) {
    let now = Instant::now();
    if instant > now {
        sleep(instant - now).await;
    } else {
        sleep(Duration::from_millis(0)).await;
    }
}

async fn forward_to_backend(session: &ProxySession, msg: ClientMessage) -> Result<(), ()> {
    let backend_msg = match msg {
        ClientMessage::Text(text) => BackendMessage::Text(text.to_string()),
        ClientMessage::Binary(bytes) => BackendMessage::Binary(bytes.to_vec()),
        ClientMessage::Ping(bytes) => BackendMessage::Ping(bytes.to_vec()),
        ClientMessage::Pong(bytes) => BackendMessage::Pong(bytes.to_vec()),
        ClientMessage::Close(reason) => BackendMessage::Close(reason.map(translate_close_to_backend)),
        ClientMessage::Continuation(_) | ClientMessage::Nop => return Ok(()),
    };
    session.backend_sink.lock().await.send(backend_msg).await.map_err(|e| {
        warn!("failed to forward message to backend: {e:?}");
    })
}

async fn forward_to_client(client: &ClientSession, msg: BackendMessage) -> Result<(), ()> {
    let mut client = client.clone();
    let result = match msg {
        BackendMessage::Text(text) => client.text(text).await,
        BackendMessage::Binary(bytes) => client.binary(bytes).await,
        BackendMessage::Ping(bytes) => client.ping(&bytes).await,
        BackendMessage::Pong(bytes) => client.pong(&bytes).await,
        BackendMessage::Close(reason) => {
            client.close(reason.map(translate_close_to_client)).await
        }
        BackendMessage::Frame(_) => return Ok(()),
    };
    result.map_err(|e| {
        warn!("failed to forward message to client: {e:?}");
    })
}

/// Mirrors the teacher's reverse-direction close-code match (client-side
/// `actix_ws::CloseCode` -> backend `tungstenite::CloseCode`).
fn translate_close_to_backend(reason: CloseReason) -> BackendCloseFrame<'static> {
    let code = match reason.code {
        actix_ws::CloseCode::Normal => BackendCloseCode::Normal,
        actix_ws::CloseCode::Away => BackendCloseCode::Away,
        actix_ws::CloseCode::Protocol => BackendCloseCode::Protocol,
        actix_ws::CloseCode::Unsupported => BackendCloseCode::Unsupported,
        actix_ws::CloseCode::Abnormal => BackendCloseCode::Abnormal,
        actix_ws::CloseCode::Invalid => BackendCloseCode::Invalid,
        actix_ws::CloseCode::Policy => BackendCloseCode::Policy,
        actix_ws::CloseCode::Size => BackendCloseCode::Size,
        actix_ws::CloseCode::Extension => BackendCloseCode::Extension,
        actix_ws::CloseCode::Error => BackendCloseCode::Error,
        actix_ws::CloseCode::Restart => BackendCloseCode::Restart,
        actix_ws::CloseCode::Again => BackendCloseCode::Again,
        _ => BackendCloseCode::Error,
    };
    BackendCloseFrame {
        code,
        reason: reason.description.unwrap_or_default().into(),
    }
}

/// Mirrors the teacher's close-code match
/// (`crates/kairos-rs/src/services/websocket.rs`), extended with the
/// `Again` arm the teacher's table already covers.
fn translate_close_to_client(frame: BackendCloseFrame<'static>) -> CloseReason {
    let code = match frame.code {
        BackendCloseCode::Normal => actix_ws::CloseCode::Normal,
        BackendCloseCode::Away => actix_ws::CloseCode::Away,
        BackendCloseCode::Protocol => actix_ws::CloseCode::Protocol,
        BackendCloseCode::Unsupported => actix_ws::CloseCode::Unsupported,
        BackendCloseCode::Abnormal => actix_ws::CloseCode::Abnormal,
        BackendCloseCode::Invalid => actix_ws::CloseCode::Invalid,
        BackendCloseCode::Policy => actix_ws::CloseCode::Policy,
        BackendCloseCode::Size => actix_ws::CloseCode::Size,
        BackendCloseCode::Extension => actix_ws::CloseCode::Extension,
        BackendCloseCode::Error => actix_ws::CloseCode::Error,
        BackendCloseCode::Restart => actix_ws::CloseCode::Restart,
        BackendCloseCode::Again => actix_ws::CloseCode::Again,
        _ => actix_ws::CloseCode::Error,
    };
    CloseReason {
        code,
        description: Some(frame.reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_closure_uses_the_4429_application_code() {
        let (code, reason) = ClosureCause::RateLimited.code_and_reason();
        assert!(matches!(code, actix_ws::CloseCode::Library(4429)));
        assert_eq!(reason, "Message rate limit exceeded");
    }

    #[test]
    fn idle_timeout_and_max_lifetime_both_close_normally() {
        let (idle_code, _) = ClosureCause::IdleTimeout.code_and_reason();
        let (lifetime_code, _) = ClosureCause::MaxLifetime.code_and_reason();
        assert!(matches!(idle_code, actix_ws::CloseCode::Normal));
        assert!(matches!(lifetime_code, actix_ws::CloseCode::Normal));
    }

    #[test]
    fn close_code_translation_round_trips_through_both_directions() {
        let backend_frame = BackendCloseFrame {
            code: BackendCloseCode::Policy,
            reason: "policy violation".into(),
        };
        let client_reason = translate_close_to_client(backend_frame);
        assert!(matches!(client_reason.code, actix_ws::CloseCode::Policy));

        let back_again = translate_close_to_backend(client_reason);
        assert!(matches!(back_again.code, BackendCloseCode::Policy));
        assert_eq!(back_again.reason, "policy violation");
    }

    #[test]
    fn unmapped_backend_codes_fall_back_to_error() {
        let frame = BackendCloseFrame {
            code: BackendCloseCode::Tls,
            reason: "".into(),
        };
        let translated = translate_close_to_client(frame);
        assert!(matches!(translated.code, actix_ws::CloseCode::Error));
    }
}
