//! URL construction helpers for request forwarding. Grounded on the
//! teacher's `format_route` (`crates/kairos-rs/src/utils/path.rs`) —
//! generalized from `host:port` concatenation to joining an absolute
//! `baseUrl` with a target path and optional query string (spec §4.5
//! "Target URI").

/// `base + path + ('?' + query)?`, trimming exactly one trailing slash off
/// `base` so repeated joins never produce a doubled `//`.
pub fn join_url(base: &str, path: &str, query: Option<&str>) -> String {
    let mut joined = format!("{}{}", base.trim_end_matches('/'), path);
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        joined.push('?');
        joined.push_str(q);
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_base_and_path_without_double_slash() {
        assert_eq!(join_url("http://up:9000/", "/hello", None), "http://up:9000/hello");
    }

    #[test]
    fn appends_query_when_present() {
        assert_eq!(
            join_url("http://up:9000", "/hello", Some("x=1")),
            "http://up:9000/hello?x=1"
        );
    }

    #[test]
    fn omits_query_when_empty() {
        assert_eq!(join_url("http://up:9000", "/hello", Some("")), "http://up:9000/hello");
    }
}
