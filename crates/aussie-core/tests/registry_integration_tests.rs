//! End-to-end route resolution through the public `ServiceRegistry` API,
//! mirroring the teacher's `tests/route_matcher_tests.rs` but driven through
//! `register`/`find_route` instead of constructing a matcher directly.

use std::collections::HashSet;
use std::sync::Arc;

use aussie_core::models::service::{
    EndpointConfig, EndpointType, ServiceRegistration, Visibility,
};
use aussie_core::registry::{InMemoryServiceRepository, ServiceRegistry};

fn methods(list: &[&str]) -> HashSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn endpoint(path: &str, methods_list: &[&str]) -> EndpointConfig {
    EndpointConfig {
        path: path.to_string(),
        methods: methods(methods_list),
        visibility: Visibility::Public,
        path_rewrite: None,
        auth_required: false,
        endpoint_type: EndpointType::Http,
        rate_limit_config: None,
        audience: None,
        operation: None,
    }
}

fn demo_registration(endpoints: Vec<EndpointConfig>) -> ServiceRegistration {
    ServiceRegistration {
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
        permission_policy: None,
        rate_limit_config: None,
        version: 1,
    }
}

async fn registry() -> ServiceRegistry {
    ServiceRegistry::new(Arc::new(InMemoryServiceRepository::default()))
}

#[tokio::test]
async fn static_route_resolves_to_registered_service() {
    let registry = registry().await;
    registry
        .register(demo_registration(vec![endpoint("/list", &["GET"])]))
        .await
        .expect("registration should succeed");

    let route = registry
        .find_route("/orders/list", "GET")
        .expect("should resolve");
    assert_eq!(route.service().service_id, "orders");
    assert_eq!(route.target_path(), "/list");
}

#[tokio::test]
async fn dynamic_segment_is_captured_and_path_rewrite_applies() {
    let registry = registry().await;
    let mut rewritten = endpoint("/orders/{id}", &["GET"]);
    rewritten.path_rewrite = Some("/v2/orders/{id}".to_string());
    registry
        .register(demo_registration(vec![rewritten]))
        .await
        .unwrap();

    let route = registry.find_route("/orders/orders/42", "GET").unwrap();
    assert_eq!(route.target_path(), "/v2/orders/42");
}

#[tokio::test]
async fn unknown_service_segment_returns_no_route() {
    let registry = registry().await;
    assert!(registry.find_route("/nonexistent/path", "GET").is_none());
}

#[tokio::test]
async fn reserved_prefixes_never_resolve_to_a_service_route() {
    let registry = registry().await;
    registry
        .register(demo_registration(vec![endpoint("/list", &["GET"])]))
        .await
        .unwrap();

    for prefix in ["admin", "gateway", "q"] {
        assert!(
            registry.find_route(&format!("/{prefix}/anything"), "GET").is_none(),
            "reserved prefix {prefix} unexpectedly resolved"
        );
    }
}

#[tokio::test]
async fn registering_a_reserved_service_id_is_rejected() {
    let registry = registry().await;
    let mut reserved = demo_registration(vec![]);
    reserved.service_id = "admin".to_string();

    let result = registry.register(reserved).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn gateway_prefix_matches_the_cross_service_endpoint_union() {
    let registry = registry().await;
    registry
        .register(demo_registration(vec![endpoint("/list", &["GET"])]))
        .await
        .unwrap();

    let route = registry.find_route("/gateway/list", "GET").unwrap();
    assert_eq!(route.service().service_id, "orders");
}

#[tokio::test]
async fn method_mismatch_on_an_otherwise_matching_path_falls_back_to_service_only_match() {
    let registry = registry().await;
    registry
        .register(demo_registration(vec![endpoint("/list", &["GET"])]))
        .await
        .unwrap();

    let route = registry.find_route("/orders/list", "DELETE").unwrap();
    assert!(route.endpoint().is_none(), "expected a service-only match");
}
