use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dotted-string permission, or the wildcard `*`.
pub type Permission = String;

/// A role name derived from a permission via `permission_to_role`.
pub type Role = String;

/// The full admin role granted by the wildcard permission.
pub const ADMIN_ROLE: &str = "admin";

/// Maps a permission string to its role name (spec §3):
/// `a:b` -> `a-b`, `a.b.c` -> unchanged, `*` -> the admin role.
pub fn permission_to_role(permission: &str) -> Role {
    if permission == "*" {
        return ADMIN_ROLE.to_string();
    }
    if permission.contains(':') {
        return permission.replace(':', "-");
    }
    permission.to_string()
}

/// Where the identity came from and what it carries (spec §4.3). Immutable
/// once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub roles: HashSet<Role>,
    pub permissions: HashSet<Permission>,
    pub attributes: IdentityAttributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityAttributes {
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub claims: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Builds an identity from a raw permission set, expanding roles via
    /// [`permission_to_role`].
    pub fn from_permissions(
        id: impl Into<String>,
        name: impl Into<String>,
        permissions: HashSet<Permission>,
        attributes: IdentityAttributes,
    ) -> Self {
        let roles = permissions.iter().map(|p| permission_to_role(p)).collect();
        Self {
            id: id.into(),
            name: name.into(),
            roles,
            permissions,
            attributes,
        }
    }

    /// The gateway's built-in bypass principal (spec §6 `dangerousNoop`).
    pub fn dev_noop() -> Self {
        let mut permissions = HashSet::new();
        permissions.insert("*".to_string());
        Identity::from_permissions(
            "dev-noop",
            "dev-noop",
            permissions,
            IdentityAttributes::default(),
        )
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }

    /// Wildcard `*` permission matches every operation (spec §4.4).
    pub fn has_any_permission(&self, required: &HashSet<String>) -> bool {
        if self.permissions.contains("*") {
            return true;
        }
        self.permissions.intersection(required).next().is_some()
    }
}
