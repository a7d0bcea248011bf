//! HTTP reverse proxy dispatch (spec §4.5). Generalizes the teacher's
//! `RouteHandler` (`crates/kairos-rs/src/services/http.rs`) — `reqwest`
//! client with pooled idle connections, header rewriting, timeout wrapping —
//! from the flat `Router` list onto the service/endpoint model.

use std::collections::HashSet;
use std::time::Duration;

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use once_cell::sync::Lazy;
use reqwest::Client;

use crate::models::error::{AussieError, AussieResult};
use crate::models::service::{EndpointConfig, ServiceRegistration};
use crate::utils::join_url;

/// Hop-by-hop headers removed on both directions, plus any header named in
/// the request's `Connection` list (spec §4.5).
static HOP_BY_HOP_HEADERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ])
});

pub struct ProxyConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_body_size: u64,
    pub max_header_size: usize,
    pub max_total_headers_size: usize,
    pub use_rfc7239: bool,
    pub gateway_id: String,
    pub session_cookie_name: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            max_header_size: 8 * 1024,
            max_total_headers_size: 32 * 1024,
            use_rfc7239: true,
            gateway_id: "aussie-gateway".to_string(),
            session_cookie_name: "aussie_session".to_string(),
        }
    }
}

pub struct HttpProxy {
    client: Client,
    config: ProxyConfig,
}

impl HttpProxy {
    pub fn new(config: ProxyConfig) -> AussieResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(32)
            .user_agent("aussie-gateway")
            .build()
            .map_err(|e| AussieError::StoreUnavailable(format!("failed to build proxy client: {e}")))?;
        Ok(Self { client, config })
    }

    /// `base_url + (endpoint.path_rewrite ?? target_path) + original_query`.
    pub fn build_target_uri(
        &self,
        service: &ServiceRegistration,
        target_path: &str,
        query: Option<&str>,
    ) -> String {
        join_url(&service.base_url, target_path, query)
    }

    /// Pre-flight size checks before dispatch (spec §4.5).
    pub fn check_size_limits(&self, content_length: Option<u64>, headers: &HeaderMap) -> AussieResult<()> {
        if let Some(len) = content_length {
            if len > self.config.max_body_size {
                return Err(AussieError::PayloadTooLarge(len, self.config.max_body_size));
            }
        }
        let mut total = 0usize;
        for (name, value) in headers.iter() {
            let size = name.as_str().len() + value.len();
            if value.len() > self.config.max_header_size {
                return Err(AussieError::RequestHeaderFieldsTooLarge(format!(
                    "header {} exceeds max size",
                    name
                )));
            }
            total += size;
        }
        if total > self.config.max_total_headers_size {
            return Err(AussieError::RequestHeaderFieldsTooLarge(
                "total header size exceeds limit".to_string(),
            ));
        }
        Ok(())
    }

    /// Strips hop-by-hop headers, `Host`, and the gateway's own session
    /// cookie, honoring any extra names listed in the request's `Connection`
    /// header (spec §4.5).
    pub fn filter_outbound_headers(&self, headers: &HeaderMap) -> Vec<(HeaderName, HeaderValue)> {
        let extra_connection_tokens: HashSet<String> = headers
            .get("connection")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').map(|t| t.trim().to_lowercase()).collect())
            .unwrap_or_default();

        headers
            .iter()
            .filter(|(name, _)| {
                let lower = name.as_str().to_lowercase();
                if HOP_BY_HOP_HEADERS.contains(lower.as_str()) {
                    return false;
                }
                if extra_connection_tokens.contains(&lower) {
                    return false;
                }
                if lower == "host" {
                    return false;
                }
                if lower == "cookie" {
                    // Cookie filtering (dropping only the gateway's own
                    // session cookie value) happens one layer up, where the
                    // raw cookie jar is available; here we keep the header
                    // and let the caller rewrite its value.
                    return true;
                }
                true
            })
            .map(|(n, v)| (n.clone(), v.clone()))
            .collect()
    }

    /// Removes only the gateway's own session cookie from a raw `Cookie`
    /// header value, preserving any others (spec §4.5).
    pub fn strip_session_cookie(&self, cookie_header: &str) -> Option<String> {
        let remaining: Vec<&str> = cookie_header
            .split(';')
            .map(|c| c.trim())
            .filter(|c| {
                !c.starts_with(&format!("{}=", self.config.session_cookie_name))
            })
            .collect();
        if remaining.is_empty() {
            None
        } else {
            Some(remaining.join("; "))
        }
    }

    /// Builds the forwarding header value per the configured mode
    /// (spec §4.5).
    pub fn forwarding_header(
        &self,
        existing_forwarded: Option<&str>,
        client_ip: &str,
        scheme: &str,
        orig_host: &str,
    ) -> (HeaderName, HeaderValue) {
        if self.config.use_rfc7239 {
            let entry = format!(
                "for={client_ip};proto={scheme};host={orig_host};by={}",
                self.config.gateway_id
            );
            let value = match existing_forwarded {
                Some(existing) if !existing.is_empty() => format!("{existing}, {entry}"),
                _ => entry,
            };
            (
                HeaderName::from_static("forwarded"),
                HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("")),
            )
        } else {
            (
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_str(client_ip).unwrap_or_else(|_| HeaderValue::from_static("")),
            )
        }
    }

    pub fn legacy_forwarded_headers(
        &self,
        scheme: &str,
        orig_host: &str,
    ) -> Vec<(HeaderName, HeaderValue)> {
        vec![
            (
                HeaderName::from_static("x-forwarded-proto"),
                HeaderValue::from_str(scheme).unwrap_or_else(|_| HeaderValue::from_static("http")),
            ),
            (
                HeaderName::from_static("x-forwarded-host"),
                HeaderValue::from_str(orig_host).unwrap_or_else(|_| HeaderValue::from_static("")),
            ),
        ]
    }

    /// Derives the WebSocket scheme (`ws`/`wss`) from the service's
    /// `base_url` (spec §4.6).
    pub fn websocket_base_url(base_url: &str) -> String {
        if let Some(rest) = base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base_url.to_string()
        }
    }

    /// Dispatches the request to the backend, forwarding the body as a
    /// stream rather than buffering it (spec §4.5). Proxy dispatch never
    /// retries (spec §7 "the gateway does not assume backend idempotency").
    pub async fn dispatch(
        &self,
        method: reqwest::Method,
        uri: &str,
        headers: Vec<(HeaderName, HeaderValue)>,
        body: reqwest::Body,
    ) -> AussieResult<reqwest::Response> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (name, value) in headers {
            if let (Ok(n), Ok(v)) = (
                reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
                reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                header_map.insert(n, v);
            }
        }

        let response = self
            .client
            .request(method, uri)
            .headers(header_map)
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp),
            Err(err) if err.is_timeout() => Err(AussieError::GatewayTimeout),
            Err(err) if err.is_connect() => {
                Err(AussieError::BadGateway(format!("upstream connection refused: {err}")))
            }
            Err(err) => Err(AussieError::BadGateway(err.to_string())),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Resolves the operation name the authorization stage checks against a
/// `ServicePermissionPolicy` (spec §4.4): the endpoint's own `operation`
/// field, falling back to `method:path` when unset.
pub fn resolve_operation_name(endpoint: &EndpointConfig, method: &str) -> String {
    endpoint
        .operation
        .clone()
        .unwrap_or_else(|| format!("{method}:{}", endpoint.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderMap, HeaderValue};

    fn config() -> ProxyConfig {
        ProxyConfig::default()
    }

    #[test]
    fn build_target_uri_joins_base_and_path() {
        let proxy = HttpProxy::new(config()).unwrap();
        let service = ServiceRegistration {
            service_id: "demo".to_string(),
            display_name: "Demo".to_string(),
            base_url: "http://up:9000".to_string(),
            route_prefix: None,
            default_visibility: crate::models::service::Visibility::Public,
            default_auth_required: false,
            visibility_rules: vec![],
            endpoints: vec![],
            access_config: None,
            cors_config: None,
            permission_policy: None,
            rate_limit_config: None,
            version: 1,
        };
        let uri = proxy.build_target_uri(&service, "/hello", Some("x=1"));
        assert_eq!(uri, "http://up:9000/hello?x=1");
    }

    #[test]
    fn filter_outbound_headers_drops_hop_by_hop() {
        let proxy = HttpProxy::new(config()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("x-custom", HeaderValue::from_static("value"));
        headers.insert("host", HeaderValue::from_static("gw"));
        let filtered = proxy.filter_outbound_headers(&headers);
        assert!(filtered.iter().all(|(n, _)| n.as_str() != "connection" && n.as_str() != "host"));
        assert!(filtered.iter().any(|(n, _)| n.as_str() == "x-custom"));
    }

    #[test]
    fn size_limit_rejects_oversized_body() {
        let proxy = HttpProxy::new(config()).unwrap();
        let headers = HeaderMap::new();
        assert!(proxy.check_size_limits(Some(10 * 1024 * 1024), &headers).is_ok());
        assert!(matches!(
            proxy.check_size_limits(Some(10 * 1024 * 1024 + 1), &headers),
            Err(AussieError::PayloadTooLarge(_, _))
        ));
    }

    #[test]
    fn websocket_base_url_derives_scheme() {
        assert_eq!(HttpProxy::websocket_base_url("https://up:9000"), "wss://up:9000");
        assert_eq!(HttpProxy::websocket_base_url("http://up:9000"), "ws://up:9000");
    }

    #[test]
    fn strips_only_gateway_session_cookie() {
        let proxy = HttpProxy::new(config()).unwrap();
        let result = proxy.strip_session_cookie("aussie_session=abc; other=keep");
        assert_eq!(result, Some("other=keep".to_string()));
    }
}
