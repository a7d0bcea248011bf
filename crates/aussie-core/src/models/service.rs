use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::error::{AussieError, AussieResult};

/// PUBLIC (anyone) or PRIVATE (source must match the access config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    Public,
    Private,
}

/// A literal-prefix visibility override, longest match wins (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRule {
    pub path_prefix: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointType {
    Http,
    Websocket,
}

/// Allow-list evaluated for PRIVATE visibility when access control applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccessConfig {
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub allowed_subdomains: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
}

/// operation name -> permissions that satisfy it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicePermissionPolicy {
    #[serde(default)]
    pub operations: HashMap<String, OperationPermission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPermission {
    pub any_of_permissions: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRateLimitConfig {
    pub requests_per_window: u64,
    pub window_seconds: u64,
    #[serde(default)]
    pub burst_capacity: Option<u64>,
}

/// A single path+method mapping within a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Pattern with `{var}` and `**` segments.
    pub path: String,
    #[serde(default = "default_methods")]
    pub methods: HashSet<String>,
    pub visibility: Visibility,
    #[serde(default)]
    pub path_rewrite: Option<String>,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(rename = "type", default = "default_endpoint_type")]
    pub endpoint_type: EndpointType,
    #[serde(default)]
    pub rate_limit_config: Option<ServiceRateLimitConfig>,
    #[serde(default)]
    pub audience: Option<String>,
    /// Operation name consulted against `ServicePermissionPolicy` (§4.4).
    #[serde(default)]
    pub operation: Option<String>,
}

fn default_methods() -> HashSet<String> {
    let mut set = HashSet::new();
    set.insert("GET".to_string());
    set
}

fn default_endpoint_type() -> EndpointType {
    EndpointType::Http
}

impl EndpointConfig {
    /// HTTP endpoints require at least one method; WebSocket endpoints
    /// default to GET via `default_methods`.
    pub fn validate(&self) -> AussieResult<()> {
        if self.path.is_empty() || !self.path.starts_with('/') {
            return Err(AussieError::BadRequest(format!(
                "endpoint path must start with '/': {}",
                self.path
            )));
        }
        if self.endpoint_type == EndpointType::Http && self.methods.is_empty() {
            return Err(AussieError::BadRequest(format!(
                "HTTP endpoint {} must declare at least one method",
                self.path
            )));
        }
        let wildcard_body = self.path.strip_suffix("/**").unwrap_or(&self.path);
        if wildcard_body.contains("**") {
            return Err(AussieError::BadRequest(format!(
                "'**' wildcard must be terminal: {}",
                self.path
            )));
        }
        Ok(())
    }

    pub fn method_matches(&self, method: &str) -> bool {
        self.methods.contains(method) || self.methods.contains("*")
    }
}

/// Unit of backend registration (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistration {
    pub service_id: String,
    pub display_name: String,
    pub base_url: String,
    #[serde(default)]
    pub route_prefix: Option<String>,
    #[serde(default = "default_visibility")]
    pub default_visibility: Visibility,
    #[serde(default)]
    pub default_auth_required: bool,
    #[serde(default)]
    pub visibility_rules: Vec<VisibilityRule>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub access_config: Option<ServiceAccessConfig>,
    #[serde(default)]
    pub cors_config: Option<ServiceCorsConfig>,
    #[serde(default)]
    pub permission_policy: Option<ServicePermissionPolicy>,
    #[serde(default)]
    pub rate_limit_config: Option<ServiceRateLimitConfig>,
    #[serde(default = "default_version")]
    pub version: u64,
}

fn default_visibility() -> Visibility {
    Visibility::Private
}

fn default_version() -> u64 {
    1
}

/// Reserved first path segments that are the gateway's own surfaces, never
/// service ids (spec §4.1).
pub const RESERVED_PREFIXES: &[&str] = &["admin", "gateway", "q"];

impl ServiceRegistration {
    /// `service_id` must be alphanumeric plus `-`/`_`, non-empty, and must
    /// not collide with a reserved gateway surface.
    pub fn validate(&self) -> AussieResult<()> {
        if self.service_id.is_empty()
            || !self
                .service_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AussieError::BadRequest(format!(
                "invalid serviceId: {}",
                self.service_id
            )));
        }
        if RESERVED_PREFIXES.contains(&self.service_id.as_str()) {
            return Err(AussieError::BadRequest(format!(
                "serviceId '{}' collides with a reserved gateway surface",
                self.service_id
            )));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(AussieError::BadRequest(format!(
                "baseUrl must be an absolute http(s) URI: {}",
                self.base_url
            )));
        }
        for endpoint in &self.endpoints {
            endpoint.validate()?;
        }
        if self.version < 1 {
            return Err(AussieError::BadRequest(
                "version must be monotone >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Longest-matching `VisibilityRule` prefix wins; ties broken by earliest
    /// registration order (Open Question decision, see DESIGN.md).
    pub fn effective_visibility(&self, path: &str, endpoint: Option<&EndpointConfig>) -> Visibility {
        let mut best: Option<(&VisibilityRule, usize)> = None;
        for rule in &self.visibility_rules {
            if path.starts_with(&rule.path_prefix) {
                let len = rule.path_prefix.len();
                if best.map(|(_, best_len)| len > best_len).unwrap_or(true) {
                    best = Some((rule, len));
                }
            }
        }
        if let Some((rule, _)) = best {
            return rule.visibility;
        }
        if let Some(ep) = endpoint {
            return ep.visibility;
        }
        self.default_visibility
    }
}

/// Path variables extracted during matching, e.g. `{id}` -> `"42"`.
pub type PathVariables = HashMap<String, String>;

/// Result of resolving a request path against the registry (spec §3).
#[derive(Debug, Clone)]
pub enum RouteLookupResult {
    RouteMatch {
        service: ServiceRegistration,
        endpoint: EndpointConfig,
        target_path: String,
        path_variables: PathVariables,
    },
    ServiceOnlyMatch {
        service: ServiceRegistration,
        target_path: String,
    },
}

impl RouteLookupResult {
    pub fn service(&self) -> &ServiceRegistration {
        match self {
            RouteLookupResult::RouteMatch { service, .. } => service,
            RouteLookupResult::ServiceOnlyMatch { service, .. } => service,
        }
    }

    pub fn endpoint(&self) -> Option<&EndpointConfig> {
        match self {
            RouteLookupResult::RouteMatch { endpoint, .. } => Some(endpoint),
            RouteLookupResult::ServiceOnlyMatch { .. } => None,
        }
    }

    pub fn target_path(&self) -> &str {
        match self {
            RouteLookupResult::RouteMatch { target_path, .. } => target_path,
            RouteLookupResult::ServiceOnlyMatch { target_path, .. } => target_path,
        }
    }

    pub fn auth_required(&self) -> bool {
        match self {
            RouteLookupResult::RouteMatch { endpoint, .. } => endpoint.auth_required,
            RouteLookupResult::ServiceOnlyMatch { service, .. } => service.default_auth_required,
        }
    }
}
