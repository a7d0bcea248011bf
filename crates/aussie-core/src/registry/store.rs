//! Copy-on-write service registry: readers see an immutable snapshot,
//! writers build a new one and atomically swap it (spec §4.1, §5).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::{info, warn};

use crate::models::error::{AussieError, AussieResult};
use crate::models::service::{RouteLookupResult, ServiceRegistration, RESERVED_PREFIXES};

use super::matcher::EndpointTable;

/// External collaborator responsible for durable storage and cross-instance
/// invalidation (spec §6). The gateway core only depends on this trait; the
/// wire format to any particular store is out of scope.
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn list(&self) -> AussieResult<Vec<ServiceRegistration>>;
    async fn upsert(&self, registration: ServiceRegistration) -> AussieResult<()>;
    async fn delete(&self, service_id: &str) -> AussieResult<bool>;
}

/// Repository that keeps registrations only in process memory. Used as the
/// default when no external store is configured; also the natural choice
/// for tests.
#[derive(Default)]
pub struct InMemoryServiceRepository {
    inner: RwLock<HashMap<String, ServiceRegistration>>,
}

#[async_trait]
impl ServiceRepository for InMemoryServiceRepository {
    async fn list(&self) -> AussieResult<Vec<ServiceRegistration>> {
        Ok(self.inner.read().unwrap().values().cloned().collect())
    }

    async fn upsert(&self, registration: ServiceRegistration) -> AussieResult<()> {
        self.inner
            .write()
            .unwrap()
            .insert(registration.service_id.clone(), registration);
        Ok(())
    }

    async fn delete(&self, service_id: &str) -> AussieResult<bool> {
        Ok(self.inner.write().unwrap().remove(service_id).is_some())
    }
}

struct CompiledService {
    registration: ServiceRegistration,
    table: EndpointTable,
}

/// Immutable point-in-time view of every registered service. Holding a
/// reference to one of these never blocks a concurrent `register`.
struct Snapshot {
    services: HashMap<String, Arc<CompiledService>>,
    /// Cross-service endpoint union used for `/gateway/...` routes.
    gateway_table: EndpointTable,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            services: HashMap::new(),
            gateway_table: EndpointTable::compile(Vec::new()).expect("empty table always compiles"),
        }
    }
}

pub struct ServiceRegistry {
    repository: Arc<dyn ServiceRepository>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ServiceRegistry {
    pub fn new(repository: Arc<dyn ServiceRepository>) -> Self {
        Self {
            repository,
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    /// Loads every persisted registration and compiles the initial
    /// snapshot. Called once at startup.
    pub async fn load_from_repository(&self) -> AussieResult<()> {
        let registrations = self.repository.list().await?;
        let mut services = HashMap::new();
        let mut gateway_endpoints = Vec::new();
        for registration in registrations {
            registration.validate()?;
            gateway_endpoints.extend(registration.endpoints.clone());
            let table = EndpointTable::compile(registration.endpoints.clone())
                .map_err(AussieError::BadRequest)?;
            services.insert(
                registration.service_id.clone(),
                Arc::new(CompiledService { registration, table }),
            );
        }
        let gateway_table =
            EndpointTable::compile(gateway_endpoints).map_err(AussieError::BadRequest)?;
        *self.snapshot.write().unwrap() = Arc::new(Snapshot { services, gateway_table });
        info!("service registry loaded from repository");
        Ok(())
    }

    /// Atomically replaces any prior registration for the same id. Rejects
    /// malformed registrations before touching the repository or snapshot.
    pub async fn register(&self, registration: ServiceRegistration) -> AussieResult<u64> {
        registration.validate()?;

        // Write-through first: if the repository fails, the in-memory
        // snapshot must not be updated (spec §4.1 invariant).
        self.repository.upsert(registration.clone()).await.map_err(|e| {
            warn!("service repository upsert failed for {}: {e}", registration.service_id);
            AussieError::StoreUnavailable(format!("failed to persist service registration: {e}"))
        })?;

        let version = registration.version;
        let current = self.snapshot.read().unwrap().clone();
        let mut services = current.services.clone();
        let table =
            EndpointTable::compile(registration.endpoints.clone()).map_err(AussieError::BadRequest)?;
        services.insert(
            registration.service_id.clone(),
            Arc::new(CompiledService { registration, table }),
        );
        let gateway_endpoints: Vec<_> = services
            .values()
            .flat_map(|s| s.registration.endpoints.clone())
            .collect();
        let gateway_table =
            EndpointTable::compile(gateway_endpoints).map_err(AussieError::BadRequest)?;
        *self.snapshot.write().unwrap() = Arc::new(Snapshot { services, gateway_table });
        Ok(version)
    }

    pub async fn unregister(&self, service_id: &str) -> AussieResult<bool> {
        let removed = self.repository.delete(service_id).await.map_err(|e| {
            AussieError::StoreUnavailable(format!("failed to delete service registration: {e}"))
        })?;

        let current = self.snapshot.read().unwrap().clone();
        let mut services = current.services.clone();
        let existed = services.remove(service_id).is_some();
        let gateway_endpoints: Vec<_> = services
            .values()
            .flat_map(|s| s.registration.endpoints.clone())
            .collect();
        let gateway_table =
            EndpointTable::compile(gateway_endpoints).map_err(AussieError::BadRequest)?;
        *self.snapshot.write().unwrap() = Arc::new(Snapshot { services, gateway_table });
        Ok(removed || existed)
    }

    /// O(1) map lookup against the current snapshot.
    pub fn get_service(&self, service_id: &str) -> Option<ServiceRegistration> {
        self.snapshot
            .read()
            .unwrap()
            .services
            .get(service_id)
            .map(|s| s.registration.clone())
    }

    /// Resolves a request path against the registry (spec §4.1). The first
    /// path segment selects either a reserved gateway surface or a service
    /// id; the residual path is matched against that scope's endpoint table.
    pub fn find_route(&self, request_path: &str, method: &str) -> Option<RouteLookupResult> {
        let trimmed = request_path.trim_start_matches('/');
        let mut parts = trimmed.splitn(2, '/');
        let first_segment = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("");
        let residual = format!("/{rest}");

        let snapshot = self.snapshot.read().unwrap().clone();

        if first_segment == "gateway" {
            let (endpoint, vars) = snapshot.gateway_table.find_match(&residual, method)?;
            // The matching endpoint still belongs to exactly one service;
            // find it to resolve visibility/rate-limit defaults correctly.
            let owner = snapshot
                .services
                .values()
                .find(|s| s.registration.endpoints.iter().any(|e| e.path == endpoint.path))?;
            return Some(RouteLookupResult::RouteMatch {
                service: owner.registration.clone(),
                endpoint: endpoint.clone(),
                target_path: apply_rewrite(endpoint, &residual, &vars),
                path_variables: vars,
            });
        }

        if RESERVED_PREFIXES.contains(&first_segment) {
            return None;
        }

        let compiled = snapshot.services.get(first_segment)?;
        match compiled.table.find_match(&residual, method) {
            Some((endpoint, vars)) => Some(RouteLookupResult::RouteMatch {
                service: compiled.registration.clone(),
                endpoint: endpoint.clone(),
                target_path: apply_rewrite(endpoint, &residual, &vars),
                path_variables: vars,
            }),
            None => Some(RouteLookupResult::ServiceOnlyMatch {
                service: compiled.registration.clone(),
                target_path: residual,
            }),
        }
    }
}

fn apply_rewrite(
    endpoint: &crate::models::service::EndpointConfig,
    residual: &str,
    vars: &crate::models::service::PathVariables,
) -> String {
    match &endpoint.path_rewrite {
        Some(rewrite) => {
            let mut result = rewrite.clone();
            for (name, value) in vars {
                result = result.replace(&format!("{{{name}}}"), value);
            }
            result
        }
        None => residual.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::service::{EndpointType, Visibility};
    use std::collections::HashSet;

    fn demo_service() -> ServiceRegistration {
        let mut methods = HashSet::new();
        methods.insert("GET".to_string());
        ServiceRegistration {
            service_id: "demo".to_string(),
            display_name: "Demo".to_string(),
            base_url: "http://up:9000".to_string(),
            route_prefix: None,
            default_visibility: Visibility::Public,
            default_auth_required: false,
            visibility_rules: vec![],
            endpoints: vec![crate::models::service::EndpointConfig {
                path: "/hello".to_string(),
                methods,
                visibility: Visibility::Public,
                path_rewrite: None,
                auth_required: false,
                endpoint_type: EndpointType::Http,
                rate_limit_config: None,
                audience: None,
                operation: None,
            }],
            access_config: None,
            cors_config: None,
            permission_policy: None,
            rate_limit_config: None,
            version: 1,
        }
    }

    #[tokio::test]
    async fn register_then_get_service_round_trips() {
        let registry = ServiceRegistry::new(Arc::new(InMemoryServiceRepository::default()));
        registry.register(demo_service()).await.unwrap();
        let fetched = registry.get_service("demo").unwrap();
        assert_eq!(fetched.service_id, "demo");
    }

    #[tokio::test]
    async fn find_route_resolves_to_route_match() {
        let registry = ServiceRegistry::new(Arc::new(InMemoryServiceRepository::default()));
        registry.register(demo_service()).await.unwrap();
        let result = registry.find_route("/demo/hello", "GET").unwrap();
        match result {
            RouteLookupResult::RouteMatch { target_path, .. } => {
                assert_eq!(target_path, "/hello");
            }
            _ => panic!("expected RouteMatch"),
        }
    }

    #[tokio::test]
    async fn find_route_falls_back_to_service_only_match() {
        let registry = ServiceRegistry::new(Arc::new(InMemoryServiceRepository::default()));
        registry.register(demo_service()).await.unwrap();
        let result = registry.find_route("/demo/unmapped", "GET").unwrap();
        assert!(matches!(result, RouteLookupResult::ServiceOnlyMatch { .. }));
    }

    #[tokio::test]
    async fn unregister_removes_service() {
        let registry = ServiceRegistry::new(Arc::new(InMemoryServiceRepository::default()));
        registry.register(demo_service()).await.unwrap();
        assert!(registry.unregister("demo").await.unwrap());
        assert!(registry.get_service("demo").is_none());
    }

    #[tokio::test]
    async fn reserved_prefix_never_resolves_as_service() {
        let registry = ServiceRegistry::new(Arc::new(InMemoryServiceRepository::default()));
        assert!(registry.find_route("/admin/users", "GET").is_none());
    }
}
