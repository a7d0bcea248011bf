//! End-to-end scenarios through `PipelineOrchestrator::process`, mirroring
//! the teacher's `tests/integration_tests.rs` style: build the whole stack
//! with in-memory collaborators and drive it through the public API exactly
//! as `aussie-gateway::main` would.

use std::collections::HashSet;
use std::sync::Arc;

use aussie_core::auth::api_key::{ApiKeyMechanism, InMemoryApiKeyRepository};
use aussie_core::auth::dev_noop::DevNoopMechanism;
use aussie_core::auth::{AuthChain, AuthMechanism};
use aussie_core::models::api_key::ApiKey;
use aussie_core::models::error::AussieError;
use aussie_core::models::rate_limit::EffectiveRateLimit;
use aussie_core::models::service::{
    EndpointConfig, EndpointType, OperationPermission, ServicePermissionPolicy, ServiceRegistration,
    Visibility,
};
use aussie_core::pipeline::{PipelineOrchestrator, RequestContext, SizeLimits};
use aussie_core::ratelimit::auth_limiter::{AuthRateLimitConfig, AuthRateLimiter};
use aussie_core::ratelimit::store::InMemoryRateLimitStore;
use aussie_core::ratelimit::{RateLimitAlgorithm, RateLimitStore};
use aussie_core::registry::{InMemoryServiceRepository, ServiceRegistry};
use chrono::Utc;

fn methods(list: &[&str]) -> HashSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn endpoint(path: &str, visibility: Visibility, auth_required: bool) -> EndpointConfig {
    EndpointConfig {
        path: path.to_string(),
        methods: methods(&["GET"]),
        visibility,
        path_rewrite: None,
        auth_required,
        endpoint_type: EndpointType::Http,
        rate_limit_config: None,
        audience: None,
        operation: None,
    }
}

fn request(path: &str, authorization_header: Option<&str>) -> RequestContext {
    RequestContext {
        method: "GET".to_string(),
        path: path.to_string(),
        query: None,
        content_length: None,
        header_sizes: vec![],
        forwarded_header: None,
        x_forwarded_for: None,
        peer_addr: Some("10.0.0.1:5555".to_string()),
        host: Some("gateway.internal".to_string()),
        authorization_header: authorization_header.map(|s| s.to_string()),
        session_cookie_value: None,
    }
}

fn generous_limit() -> EffectiveRateLimit {
    EffectiveRateLimit {
        requests_per_window: 1_000,
        window_seconds: 60,
        burst_capacity: 1_000,
    }
}

struct Harness {
    registry: Arc<ServiceRegistry>,
}

/// Builds a fully wired orchestrator the way `aussie-gateway::main` does,
/// letting each test swap the rate limit, auth chain, and size-limit inputs.
async fn build_pipeline(
    harness: &Harness,
    platform_limit: EffectiveRateLimit,
    mechanisms: Vec<Box<dyn AuthMechanism>>,
    sessions_enabled: bool,
) -> PipelineOrchestrator {
    let rate_limit_store: Arc<dyn RateLimitStore> = Arc::new(InMemoryRateLimitStore::new());
    let auth_rate_limiter = Arc::new(AuthRateLimiter::new(AuthRateLimitConfig {
        enabled: false,
        ..Default::default()
    }));
    let auth_chain = Arc::new(AuthChain::new(mechanisms, sessions_enabled));

    PipelineOrchestrator::new(
        harness.registry.clone(),
        rate_limit_store,
        RateLimitAlgorithm::FixedWindow,
        platform_limit,
        auth_rate_limiter,
        auth_chain,
        None,
        SizeLimits {
            max_body_size: 10 * 1024 * 1024,
            max_header_size: 8 * 1024,
            max_total_headers_size: 32 * 1024,
        },
    )
}

async fn harness_with(endpoints: Vec<EndpointConfig>, permission_policy: Option<ServicePermissionPolicy>) -> Harness {
    let registry = Arc::new(ServiceRegistry::new(Arc::new(InMemoryServiceRepository::default())));
    registry
        .register(ServiceRegistration {
            service_id: "orders".to_string(),
            display_name: "Orders".to_string(),
            base_url: "http://orders.internal:9000".to_string(),
            route_prefix: None,
            default_visibility: Visibility::Public,
            default_auth_required: false,
            visibility_rules: vec![],
            endpoints,
            access_config: None,
            cors_config: None,
            permission_policy,
            rate_limit_config: None,
            version: 1,
        })
        .await
        .expect("registration should succeed");
    Harness { registry }
}

#[tokio::test]
async fn public_unauthenticated_endpoint_is_allowed_through() {
    let harness = harness_with(vec![endpoint("/list", Visibility::Public, false)], None).await;
    let pipeline = build_pipeline(&harness, generous_limit(), vec![], false).await;

    let decision = pipeline.process(&request("/orders/list", None)).await.unwrap();
    assert_eq!(decision.route.service().service_id, "orders");
    assert!(decision.identity.is_none());
}

#[tokio::test]
async fn exhausting_the_platform_rate_limit_returns_too_many_requests() {
    let harness = harness_with(vec![endpoint("/list", Visibility::Public, false)], None).await;
    let tiny_limit = EffectiveRateLimit {
        requests_per_window: 1,
        window_seconds: 60,
        burst_capacity: 1,
    };
    let pipeline = build_pipeline(&harness, tiny_limit, vec![], false).await;

    pipeline.process(&request("/orders/list", None)).await.unwrap();
    let second = pipeline.process(&request("/orders/list", None)).await;
    assert!(matches!(second, Err(AussieError::TooManyRequests { .. })));
}

#[tokio::test]
async fn auth_required_endpoint_without_credentials_is_unauthorized() {
    let harness = harness_with(vec![endpoint("/list", Visibility::Public, true)], None).await;
    let pipeline = build_pipeline(&harness, generous_limit(), vec![], false).await;

    let result = pipeline.process(&request("/orders/list", None)).await;
    assert!(matches!(result, Err(AussieError::Unauthorized(_))));
}

#[tokio::test]
async fn private_endpoint_denial_is_indistinguishable_from_an_unknown_route() {
    // Existence-hiding (spec-described behavior): an access-control denial on
    // a known private endpoint must look exactly like a route that doesn't
    // exist, so no unauthenticated caller can distinguish the two.
    let harness = harness_with(vec![endpoint("/secret", Visibility::Private, false)], None).await;
    let pipeline = build_pipeline(&harness, generous_limit(), vec![], false).await;

    let unknown = pipeline.process(&request("/orders/does-not-exist", None)).await;
    let denied = pipeline.process(&request("/orders/secret", None)).await;

    let unknown_err = unknown.unwrap_err();
    let denied_err = denied.unwrap_err();
    assert!(matches!(unknown_err, AussieError::NotFound(_)));
    assert!(matches!(denied_err, AussieError::NotFound(_)));
}

#[tokio::test]
async fn permission_policy_denies_authenticated_principal_lacking_the_operation_permission() {
    let mut endpoint_cfg = endpoint("/list", Visibility::Public, true);
    endpoint_cfg.operation = Some("read".to_string());

    let mut operations = std::collections::HashMap::new();
    operations.insert(
        "read".to_string(),
        OperationPermission {
            any_of_permissions: HashSet::from(["orders.read".to_string()]),
        },
    );
    let policy = ServicePermissionPolicy { operations };

    let harness = harness_with(vec![endpoint_cfg], Some(policy)).await;

    let api_key_repository = Arc::new(InMemoryApiKeyRepository::default());
    let mut permissions = HashSet::new();
    permissions.insert("orders.write".to_string());
    api_key_repository.insert(ApiKey {
        id: "key-1".to_string(),
        key_hash: ApiKey::hash_plaintext("aussie_WRITEONLY"),
        name: "write-only key".to_string(),
        permissions,
        created_at: Utc::now(),
        expires_at: None,
        revoked: false,
    });
    let mechanisms: Vec<Box<dyn AuthMechanism>> =
        vec![Box::new(ApiKeyMechanism::new(api_key_repository))];
    let pipeline = build_pipeline(&harness, generous_limit(), mechanisms, false).await;

    let result = pipeline
        .process(&request("/orders/list", Some("Bearer aussie_WRITEONLY")))
        .await;
    assert!(matches!(result, Err(AussieError::Forbidden(_))));
}

#[tokio::test]
async fn matching_permission_is_allowed_through() {
    let mut endpoint_cfg = endpoint("/list", Visibility::Public, true);
    endpoint_cfg.operation = Some("read".to_string());

    let mut operations = std::collections::HashMap::new();
    operations.insert(
        "read".to_string(),
        OperationPermission {
            any_of_permissions: HashSet::from(["orders.read".to_string()]),
        },
    );
    let policy = ServicePermissionPolicy { operations };

    let harness = harness_with(vec![endpoint_cfg], Some(policy)).await;

    let api_key_repository = Arc::new(InMemoryApiKeyRepository::default());
    let mut permissions = HashSet::new();
    permissions.insert("orders.read".to_string());
    api_key_repository.insert(ApiKey {
        id: "key-2".to_string(),
        key_hash: ApiKey::hash_plaintext("aussie_READER"),
        name: "reader key".to_string(),
        permissions,
        created_at: Utc::now(),
        expires_at: None,
        revoked: false,
    });
    let mechanisms: Vec<Box<dyn AuthMechanism>> =
        vec![Box::new(ApiKeyMechanism::new(api_key_repository))];
    let pipeline = build_pipeline(&harness, generous_limit(), mechanisms, false).await;

    let decision = pipeline
        .process(&request("/orders/list", Some("Bearer aussie_READER")))
        .await
        .unwrap();
    assert_eq!(decision.identity.unwrap().name, "reader key");
}

#[tokio::test]
async fn dev_noop_mechanism_authenticates_every_request_as_admin_when_present() {
    let harness = harness_with(vec![endpoint("/list", Visibility::Public, true)], None).await;
    let mechanisms: Vec<Box<dyn AuthMechanism>> = vec![Box::new(DevNoopMechanism)];
    let pipeline = build_pipeline(&harness, generous_limit(), mechanisms, false).await;

    let decision = pipeline
        .process(&request("/orders/list", None))
        .await
        .unwrap();
    let identity = decision.identity.expect("dev noop always authenticates");
    assert!(identity.permissions.contains("*"));
}

#[tokio::test]
async fn unknown_api_key_fails_authentication_before_reaching_permission_checks() {
    let harness = harness_with(vec![endpoint("/list", Visibility::Public, true)], None).await;
    let api_key_repository = Arc::new(InMemoryApiKeyRepository::default());
    let mechanisms: Vec<Box<dyn AuthMechanism>> =
        vec![Box::new(ApiKeyMechanism::new(api_key_repository))];
    let pipeline = build_pipeline(&harness, generous_limit(), mechanisms, false).await;

    let result = pipeline
        .process(&request("/orders/list", Some("Bearer aussie_NOSUCHKEY")))
        .await;
    assert!(matches!(result, Err(AussieError::Unauthorized(_))));
}
