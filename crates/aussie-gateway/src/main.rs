//! Aussie API Gateway server entry point.
//!
//! Wires the `aussie-core` building blocks (registry, rate limiter, auth
//! chain, session manager, reverse proxy) into an `actix-web` `HttpServer`,
//! the way the teacher's `crates/kairos-gateway/src/main.rs` wires
//! `RouteHandler`/`AdvancedRateLimit`/`WebSocketHandler` — one composition
//! root, no logic of its own beyond request routing and response-header
//! egress.

use std::sync::Arc;
use std::time::Instant;

use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use chrono::Duration as ChronoDuration;
use log::{error, info, warn};
use tokio::signal;
use uuid::Uuid;

use aussie_core::auth::api_key::{ApiKeyMechanism, InMemoryApiKeyRepository};
use aussie_core::auth::dev_noop::DevNoopMechanism;
use aussie_core::auth::session_cookie::SessionCookieMechanism;
use aussie_core::auth::{AuthChain, AuthMechanism, AuthRequestContext};
use aussie_core::config::{load_settings, AussieSettings, ConfigValidator};
use aussie_core::logs::configure_logger;
use aussie_core::models::rate_limit::{EffectiveRateLimit, RateLimitDecision};
use aussie_core::models::service::EndpointType;
use aussie_core::pipeline::{PipelineDecision, PipelineOrchestrator, RequestContext, SizeLimits};
use aussie_core::proxy::websocket::{bridge, WebSocketConfig};
use aussie_core::proxy::{HttpProxy, ProxyConfig};
use aussie_core::ratelimit::auth_limiter::{AuthRateLimitConfig, AuthRateLimiter, InMemoryFailedAttemptRepository};
use aussie_core::ratelimit::store::{InMemoryRateLimitStore, RateLimitStore};
use aussie_core::ratelimit::RateLimitAlgorithm;
use aussie_core::registry::{InMemoryServiceRepository, ServiceRegistry};
use aussie_core::session::{InMemorySessionRepository, SessionManager};

/// Everything a request handler needs, built once at startup and shared
/// across workers behind `web::Data`.
struct GatewayState {
    settings: AussieSettings,
    pipeline: PipelineOrchestrator,
    http_proxy: HttpProxy,
    websocket_config: WebSocketConfig,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings = load_settings().unwrap_or_else(|e| {
        error!("failed to load configuration: {e}");
        std::process::exit(1);
    });

    info!("starting Aussie API Gateway");

    let validation = ConfigValidator::validate_comprehensive(&settings);
    if !validation.is_valid {
        error!("configuration failed validation, refusing to start");
        std::process::exit(1);
    }

    let registry = Arc::new(ServiceRegistry::new(Arc::new(
        InMemoryServiceRepository::default(),
    )));

    let rate_limit_store: Arc<dyn RateLimitStore> = Arc::new(InMemoryRateLimitStore::new());
    let rate_limit_algorithm = settings.rate_limit.algorithm;
    let platform_rate_limit = EffectiveRateLimit {
        requests_per_window: settings.rate_limit.default_requests_per_window as u64,
        window_seconds: settings.rate_limit.default_window_seconds,
        burst_capacity: settings.rate_limit.default_burst_capacity as u64,
    };

    let auth_rate_limiter = Arc::new(AuthRateLimiter::new(
        AuthRateLimitConfig {
            enabled: settings.auth_rate_limit.enabled,
            max_failed_attempts: settings.auth_rate_limit.max_failed_attempts,
            lockout_duration_secs: settings.auth_rate_limit.lockout_duration_secs as i64,
            failed_attempt_window_secs: settings.auth_rate_limit.failed_attempt_window_secs as i64,
            track_by_ip: settings.auth_rate_limit.track_by_ip,
            track_by_identifier: settings.auth_rate_limit.track_by_identifier,
            progressive_multiplier: settings.auth_rate_limit.progressive_multiplier,
            max_lockout_duration_secs: settings.auth_rate_limit.max_lockout_duration_secs as i64,
        },
        Arc::new(InMemoryFailedAttemptRepository::default()),
    ));

    let api_key_repository = Arc::new(InMemoryApiKeyRepository::default());
    let session_repository = Arc::new(InMemorySessionRepository::default());
    let session_manager = Arc::new(SessionManager::new(session_repository));

    let mut mechanisms: Vec<Box<dyn AuthMechanism>> =
        vec![Box::new(ApiKeyMechanism::new(api_key_repository))];
    if settings.session.enabled {
        mechanisms.push(Box::new(SessionCookieMechanism::new(
            session_manager.clone(),
            ChronoDuration::seconds(settings.session.idle_timeout_secs as i64),
            settings.session.sliding_expiration,
            ChronoDuration::seconds(settings.session.ttl_secs as i64),
        )));
    }
    // JWKS fetching is an external collaborator (out of core scope, spec
    // §1); a real deployment plugs a `JwksProvider` in here and pushes a
    // `JwtMechanism`. Omitted from the default chain.
    if settings.dangerous_noop {
        mechanisms.push(Box::new(DevNoopMechanism));
    }
    let auth_chain = Arc::new(AuthChain::new(mechanisms, settings.session.enabled));

    let pipeline = PipelineOrchestrator::new(
        registry.clone(),
        rate_limit_store,
        rate_limit_algorithm,
        platform_rate_limit,
        auth_rate_limiter,
        auth_chain,
        None,
        SizeLimits {
            max_body_size: settings.limits.max_body_size,
            max_header_size: settings.limits.max_header_size,
            max_total_headers_size: settings.limits.max_total_headers_size,
        },
    );

    let http_proxy = HttpProxy::new(ProxyConfig {
        connect_timeout: std::time::Duration::from_secs(settings.resiliency.http.connect_timeout_secs),
        request_timeout: std::time::Duration::from_secs(settings.resiliency.http.request_timeout_secs),
        max_body_size: settings.limits.max_body_size,
        max_header_size: settings.limits.max_header_size,
        max_total_headers_size: settings.limits.max_total_headers_size,
        use_rfc7239: settings.forwarding.use_rfc7239,
        gateway_id: settings.forwarding.gateway_id.clone(),
        session_cookie_name: settings.session.cookie.name.clone(),
    })
    .unwrap_or_else(|e| {
        error!("failed to build HTTP proxy client: {e}");
        std::process::exit(1);
    });

    let websocket_config = WebSocketConfig {
        idle_timeout: settings.websocket_idle_timeout(),
        max_lifetime: settings.websocket_max_lifetime(),
        ping_enabled: settings.websocket.ping.enabled,
        ping_interval: std::time::Duration::from_secs(settings.websocket.ping.interval_secs),
        ping_timeout: std::time::Duration::from_secs(settings.websocket.ping.timeout_secs),
    };

    let state = web::Data::new(GatewayState {
        settings: settings.clone(),
        pipeline,
        http_proxy,
        websocket_config,
    });

    let host = std::env::var("AUSSIE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("AUSSIE_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    info!("listening on {host}:{port}");

    let max_body_size = settings.limits.max_body_size as usize;
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(max_body_size))
            .route("/healthz", web::get().to(healthz))
            .default_service(web::route().to(dispatch))
    })
    .bind((host.as_str(), port))?
    .run();

    tokio::select! {
        result = server => {
            match result {
                Ok(()) => info!("server stopped gracefully"),
                Err(e) => error!("server error: {e}"),
            }
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, stopping server...");
        }
    }

    Ok(())
}

async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// The gateway's single request entry point: `/<serviceId>/...` and
/// `/gateway/...` run through the pipeline and get proxied; `/admin`, `/q`
/// are the gateway's own reserved surfaces (spec §6) and are out of core
/// scope beyond their contract, so they're stubbed here.
///
/// Every request gets a request id (generated fresh, or taken from an
/// inbound `X-Request-Id`), echoed back on the response and carried through
/// the access log line emitted once the response is known.
async fn dispatch(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse, actix_web::Error> {
    let start = Instant::now();
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = req.method().to_string();
    let path = req.path().to_string();

    let mut response = handle(req, payload, state).await?;
    response.headers_mut().insert(
        HeaderName::from_static("x-request-id"),
        HeaderValue::from_str(&request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );

    info!(
        "request_id={request_id} method={method} path={path} status={} duration_ms={}",
        response.status().as_u16(),
        start.elapsed().as_millis()
    );

    Ok(response)
}

async fn handle(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse, actix_web::Error> {
    let path = req.path().to_string();
    let first_segment = path.trim_start_matches('/').split('/').next().unwrap_or("");

    if first_segment == "admin" || first_segment == "q" {
        return Ok(HttpResponse::NotImplemented().json(serde_json::json!({
            "detail": format!("/{first_segment} is a reserved gateway surface handled by an external collaborator")
        })));
    }

    let pipeline_request = build_pipeline_request(&req);
    let decision = match state.pipeline.process(&pipeline_request).await {
        Ok(decision) => decision,
        Err(err) => return Ok(err.error_response()),
    };

    let is_websocket = matches!(
        decision.route.endpoint().map(|e| e.endpoint_type),
        Some(EndpointType::Websocket)
    );

    if is_websocket {
        return dispatch_websocket(req, payload, state, decision).await;
    }

    dispatch_http(req, payload, state, decision).await
}

fn build_pipeline_request(req: &HttpRequest) -> RequestContext {
    let header_sizes = req
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), name.as_str().len() + value.len()))
        .collect();

    let forwarded_header = req
        .headers()
        .get("forwarded")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let x_forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let peer_addr = req.peer_addr().map(|addr| addr.to_string());
    let host = req
        .headers()
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let authorization_header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let session_cookie_value = req
        .cookie("aussie_session")
        .map(|c| c.value().to_string());

    RequestContext {
        method: req.method().to_string(),
        path: req.path().to_string(),
        query: (!req.query_string().is_empty()).then(|| req.query_string().to_string()),
        content_length: req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok()),
        header_sizes,
        forwarded_header,
        x_forwarded_for,
        peer_addr,
        host,
        authorization_header,
        session_cookie_value,
    }
}

async fn dispatch_http(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<GatewayState>,
    decision: PipelineDecision,
) -> Result<HttpResponse, actix_web::Error> {
    let proxy = &state.http_proxy;

    let content_length = req
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());
    if let Err(err) = proxy.check_size_limits(content_length, req.headers()) {
        return Ok(err.error_response());
    }

    let target_uri = proxy.build_target_uri(
        decision.route.service(),
        decision.route.target_path(),
        (!req.query_string().is_empty()).then_some(req.query_string()),
    );

    let mut headers = proxy.filter_outbound_headers(req.headers());
    let scheme = req.connection_info().scheme().to_string();
    let orig_host = req.connection_info().host().to_string();
    let (name, value) = proxy.forwarding_header(
        req.headers().get("forwarded").and_then(|v| v.to_str().ok()),
        &decision.source_ip,
        &scheme,
        &orig_host,
    );
    headers.push((name, value));
    if !state.settings.forwarding.use_rfc7239 {
        headers.extend(proxy.legacy_forwarded_headers(&scheme, &orig_host));
    }
    if let Some(cookie_header) = req.headers().get("cookie").and_then(|v| v.to_str().ok()) {
        if let Some(stripped) = proxy.strip_session_cookie(cookie_header) {
            headers.retain(|(n, _)| n.as_str() != "cookie");
            if let Ok(value) = HeaderValue::from_str(&stripped) {
                headers.push((HeaderName::from_static("cookie"), value));
            }
        }
    }

    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let outbound_body = reqwest::Body::wrap_stream(payload);

    let upstream = match proxy.dispatch(method, &target_uri, headers, outbound_body).await {
        Ok(resp) => resp,
        Err(err) => return Ok(err.error_response()),
    };

    let mut builder = HttpResponse::build(
        actix_web::http::StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY),
    );
    for (name, value) in upstream.headers().iter() {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder.insert_header((n, v));
        }
    }
    apply_rate_limit_headers(&mut builder, &decision.rate_limit, &state.settings);

    Ok(builder.streaming(upstream.bytes_stream()))
}

async fn dispatch_websocket(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<GatewayState>,
    decision: PipelineDecision,
) -> Result<HttpResponse, actix_web::Error> {
    let backend_base = HttpProxy::websocket_base_url(&decision.route.service().base_url);
    let backend_url = format!(
        "{}{}",
        backend_base.trim_end_matches('/'),
        decision.route.target_path()
    );

    let (response, session, msg_stream) = actix_ws::handle(&req, payload)?;

    let websocket_config = WebSocketConfig {
        idle_timeout: state.websocket_config.idle_timeout,
        max_lifetime: state.websocket_config.max_lifetime,
        ping_enabled: state.websocket_config.ping_enabled,
        ping_interval: state.websocket_config.ping_interval,
        ping_timeout: state.websocket_config.ping_timeout,
    };

    actix_web::rt::spawn(async move {
        if let Err(err) = bridge(session, msg_stream, backend_url, websocket_config, None).await {
            warn!("websocket bridge ended with error: {err}");
        }
    });

    Ok(response)
}

fn apply_rate_limit_headers(
    builder: &mut actix_web::HttpResponseBuilder,
    decision: &RateLimitDecision,
    settings: &AussieSettings,
) {
    if !settings.rate_limit.include_headers {
        return;
    }
    if let RateLimitDecision::Allow {
        remaining,
        reset_at_secs,
    } = decision
    {
        builder.insert_header((
            "X-RateLimit-Limit",
            settings.rate_limit.default_requests_per_window.to_string(),
        ));
        builder.insert_header(("X-RateLimit-Remaining", remaining.to_string()));
        builder.insert_header(("X-RateLimit-Reset", reset_at_secs.to_string()));
    }
}
