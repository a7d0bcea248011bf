//! Path-pattern matcher generalizing the teacher's `route_matcher.rs` to the
//! `{var}` and terminal `**` segments spec'd in §4.1.

use std::sync::Arc;

use regex::Regex;

use crate::models::service::{EndpointConfig, PathVariables};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SegmentKind {
    Wildcard,
    Variable,
    Literal,
}

/// A single endpoint compiled into a matchable regex plus metadata used for
/// specificity ordering.
#[derive(Clone)]
pub struct CompiledEndpoint {
    pub endpoint: EndpointConfig,
    regex: Arc<Regex>,
    param_names: Vec<String>,
    kind: SegmentKind,
    literal_prefix_len: usize,
}

impl CompiledEndpoint {
    pub fn compile(endpoint: EndpointConfig) -> Result<Self, String> {
        let (pattern, param_names, kind, literal_prefix_len) = compile_pattern(&endpoint.path)?;
        let regex = Regex::new(&pattern).map_err(|e| format!("invalid route pattern: {e}"))?;
        Ok(Self {
            endpoint,
            regex: Arc::new(regex),
            param_names,
            kind,
            literal_prefix_len,
        })
    }

    fn try_match(&self, path: &str) -> Option<PathVariables> {
        let captures = self.regex.captures(path)?;
        let mut vars = PathVariables::new();
        for name in &self.param_names {
            if let Some(value) = captures.name(name) {
                vars.insert(name.clone(), value.as_str().to_string());
            }
        }
        Some(vars)
    }
}

/// Converts a `{var}`/`**` path pattern into an anchored regex. Literal
/// regex metacharacters are escaped segment-by-segment.
fn compile_pattern(path: &str) -> Result<(String, Vec<String>, SegmentKind, usize), String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut pattern = String::from("^");
    let mut param_names = Vec::new();
    let mut kind = SegmentKind::Literal;
    let mut literal_prefix_len = 0;
    let mut seen_non_literal = false;

    for (idx, segment) in segments.iter().enumerate() {
        pattern.push('/');
        if *segment == "**" {
            if idx != segments.len() - 1 {
                return Err("'**' wildcard must be terminal".to_string());
            }
            pattern.push_str("(?P<__wildcard>.+)");
            kind = SegmentKind::Wildcard;
            seen_non_literal = true;
        } else if segment.starts_with('{') && segment.ends_with('}') {
            let name = &segment[1..segment.len() - 1];
            if name.is_empty() {
                return Err("empty path variable name".to_string());
            }
            param_names.push(name.to_string());
            pattern.push_str(&format!("(?P<{name}>[^/]+)"));
            if kind == SegmentKind::Literal {
                kind = SegmentKind::Variable;
            }
            seen_non_literal = true;
        } else {
            pattern.push_str(&regex::escape(segment));
            if !seen_non_literal {
                literal_prefix_len += segment.len() + 1;
            }
        }
    }
    pattern.push('$');
    Ok((pattern, param_names, kind, literal_prefix_len))
}

/// Compiled endpoint table for one service (or the cross-service `/gateway`
/// union). Specificity ordering, most specific first: literal > variable >
/// `**`; ties broken by longer literal prefix (spec §4.1).
pub struct EndpointTable {
    endpoints: Vec<CompiledEndpoint>,
}

impl EndpointTable {
    pub fn compile(endpoints: Vec<EndpointConfig>) -> Result<Self, String> {
        let mut compiled = endpoints
            .into_iter()
            .map(CompiledEndpoint::compile)
            .collect::<Result<Vec<_>, _>>()?;
        compiled.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then_with(|| b.literal_prefix_len.cmp(&a.literal_prefix_len))
        });
        Ok(Self { endpoints: compiled })
    }

    pub fn find_match(&self, path: &str, method: &str) -> Option<(&EndpointConfig, PathVariables)> {
        for compiled in &self.endpoints {
            if !compiled.endpoint.method_matches(method) {
                continue;
            }
            if let Some(vars) = compiled.try_match(path) {
                return Some((&compiled.endpoint, vars));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::service::{EndpointType, Visibility};
    use std::collections::HashSet;

    fn endpoint(path: &str) -> EndpointConfig {
        let mut methods = HashSet::new();
        methods.insert("GET".to_string());
        EndpointConfig {
            path: path.to_string(),
            methods,
            visibility: Visibility::Public,
            path_rewrite: None,
            auth_required: false,
            endpoint_type: EndpointType::Http,
            rate_limit_config: None,
            audience: None,
            operation: None,
        }
    }

    #[test]
    fn matches_variable_and_wildcard() {
        let table = EndpointTable::compile(vec![endpoint("/a/{x}/**")]).unwrap();
        let (_, vars) = table.find_match("/a/1/b/c", "GET").expect("should match");
        assert_eq!(vars.get("x"), Some(&"1".to_string()));
        assert_eq!(vars.get("__wildcard"), Some(&"b/c".to_string()));
    }

    #[test]
    fn rejects_missing_required_var() {
        let table = EndpointTable::compile(vec![endpoint("/a/{x}/**")]).unwrap();
        assert!(table.find_match("/a/", "GET").is_none());
    }

    #[test]
    fn literal_beats_variable() {
        let table =
            EndpointTable::compile(vec![endpoint("/users/{id}"), endpoint("/users/me")]).unwrap();
        let (matched, _) = table.find_match("/users/me", "GET").unwrap();
        assert_eq!(matched.path, "/users/me");
    }

    #[test]
    fn method_mismatch_skips_endpoint() {
        let table = EndpointTable::compile(vec![endpoint("/users")]).unwrap();
        assert!(table.find_match("/users", "POST").is_none());
    }
}
