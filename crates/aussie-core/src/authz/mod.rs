//! Authorization & access control: two orthogonal gates (spec §4.4).

pub mod access_control;
pub mod permissions;

pub use access_control::{extract_source_ip, is_source_allowed, SourceIdentifier};
pub use permissions::{check_role_gate, check_service_permission_policy};
