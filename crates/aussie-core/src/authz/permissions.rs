//! Post-auth authorization (spec §4.4): declarative role gates for
//! gateway-internal endpoints, and per-service `ServicePermissionPolicy`
//! evaluation for proxied operations.

use crate::models::identity::Identity;
use crate::models::service::ServicePermissionPolicy;

/// Declarative role gate: proceeds iff the identity has at least one of the
/// required roles.
pub fn check_role_gate(identity: &Identity, required_roles: &[&str]) -> bool {
    required_roles.is_empty() || identity.has_any_role(required_roles)
}

/// Resolves the operation for the incoming request against the policy and
/// checks the principal's expanded permissions intersect `any_of_permissions`.
/// Missing policy or missing operation entry falls back to `auth_required`
/// (Open Question decision, see DESIGN.md / SPEC_FULL.md §13).
pub fn check_service_permission_policy(
    identity: Option<&Identity>,
    policy: Option<&ServicePermissionPolicy>,
    operation: Option<&str>,
    auth_required: bool,
) -> bool {
    let operation_permission = policy
        .zip(operation)
        .and_then(|(p, op)| p.operations.get(op));

    match operation_permission {
        Some(op_permission) => match identity {
            Some(identity) => identity.has_any_permission(&op_permission.any_of_permissions),
            None => false,
        },
        None => !auth_required || identity.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::identity::IdentityAttributes;
    use crate::models::service::OperationPermission;
    use std::collections::{HashMap, HashSet};

    fn identity_with(permissions: &[&str]) -> Identity {
        Identity::from_permissions(
            "u1",
            "u1",
            permissions.iter().map(|s| s.to_string()).collect(),
            IdentityAttributes::default(),
        )
    }

    #[test]
    fn role_gate_passes_with_any_match() {
        let identity = identity_with(&["demo.read"]);
        assert!(check_role_gate(&identity, &["demo.read", "demo.write"]));
    }

    #[test]
    fn missing_policy_falls_back_to_auth_required() {
        assert!(check_service_permission_policy(
            Some(&identity_with(&["anything"])),
            None,
            Some("read"),
            true
        ));
        assert!(!check_service_permission_policy(None, None, Some("read"), true));
        assert!(check_service_permission_policy(None, None, Some("read"), false));
    }

    #[test]
    fn wildcard_permission_matches_every_operation() {
        let identity = identity_with(&["*"]);
        let mut operations = HashMap::new();
        operations.insert(
            "read".to_string(),
            OperationPermission {
                any_of_permissions: HashSet::from(["demo.read".to_string()]),
            },
        );
        let policy = ServicePermissionPolicy { operations };
        assert!(check_service_permission_policy(
            Some(&identity),
            Some(&policy),
            Some("read"),
            true
        ));
    }
}
