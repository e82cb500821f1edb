//! Deciding whether an inbound request is covered by an active mock.

use super::registry::{normalize_path, CompiledMock, MockRegistry, PathMatcher, Segment};
use hyper::{Method, Uri};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("malformed request path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },
}

/// Find the first mock, in registry order, matching `method` and the path of `uri`.
///
/// Pure: no I/O, no side effects. Only the path takes part in matching; host,
/// port and query string are ignored.
pub fn find_match<'a>(
    method: &Method,
    uri: &Uri,
    registry: &'a MockRegistry,
) -> Result<Option<&'a CompiledMock>, MatchError> {
    if registry.is_empty() {
        return Ok(None);
    }

    let raw_path = uri.path();
    let decoded = urlencoding::decode(raw_path).map_err(|e| MatchError::MalformedPath {
        path: raw_path.to_string(),
        reason: e.to_string(),
    })?;
    let path = normalize_path(&decoded);

    Ok(registry
        .iter()
        .find(|compiled| compiled.matches(method, path)))
}

impl CompiledMock {
    pub(crate) fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(ref expected) = self.method {
            if expected != method {
                return false;
            }
        }

        match &self.path_matcher {
            PathMatcher::Exact(exact) => path == exact,
            PathMatcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathMatcher::Regex(regex) => regex.is_match(path),
            PathMatcher::Template(segments) => {
                let mut actual = path.split('/');
                for segment in segments {
                    let Some(part) = actual.next() else {
                        return false;
                    };
                    match segment {
                        Segment::Param => {
                            if part.is_empty() {
                                return false;
                            }
                        }
                        Segment::Literal(literal) => {
                            if literal != part {
                                return false;
                            }
                        }
                    }
                }
                actual.next().is_none()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{ActiveMock, MatchRule};

    fn registry(mocks: Vec<ActiveMock>) -> MockRegistry {
        MockRegistry::new(mocks).unwrap()
    }

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_registry_never_matches() {
        let reg = MockRegistry::default();
        let result = find_match(&Method::GET, &uri("/orders/42"), &reg).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_template_matches_param_segment() {
        let reg = registry(vec![ActiveMock::new("GET", "/orders/:id", "alice")]);
        let matched = find_match(&Method::GET, &uri("http://shop.test/orders/42"), &reg)
            .unwrap()
            .unwrap();
        assert_eq!(matched.user_context(), "alice");

        assert!(find_match(&Method::GET, &uri("/orders"), &reg)
            .unwrap()
            .is_none());
        assert!(find_match(&Method::GET, &uri("/orders/42/items"), &reg)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_template_brace_and_star_params() {
        let reg = registry(vec![
            ActiveMock::new("GET", "/users/{id}/cart", "a"),
            ActiveMock::new("GET", "/files/*", "b"),
        ]);
        assert!(find_match(&Method::GET, &uri("/users/7/cart"), &reg)
            .unwrap()
            .is_some());
        assert_eq!(
            find_match(&Method::GET, &uri("/files/report.pdf"), &reg)
                .unwrap()
                .unwrap()
                .user_context(),
            "b"
        );
    }

    #[test]
    fn test_method_must_match() {
        let reg = registry(vec![ActiveMock::new("POST", "/checkout", "u")]);
        assert!(find_match(&Method::GET, &uri("/checkout"), &reg)
            .unwrap()
            .is_none());
        assert!(find_match(&Method::POST, &uri("/checkout"), &reg)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_wildcard_method() {
        let reg = registry(vec![ActiveMock::new("*", "/any", "u")]);
        assert!(find_match(&Method::DELETE, &uri("/any"), &reg)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_query_string_ignored() {
        let reg = registry(vec![
            ActiveMock::new("GET", "/search", "u").with_match_rule(MatchRule::Exact)
        ]);
        assert!(find_match(&Method::GET, &uri("/search?q=rust&page=2"), &reg)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_exact_tolerates_trailing_slash() {
        let reg = registry(vec![
            ActiveMock::new("GET", "/search", "u").with_match_rule(MatchRule::Exact)
        ]);
        assert!(find_match(&Method::GET, &uri("/search/"), &reg)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_prefix_and_regex_rules() {
        let reg = registry(vec![
            ActiveMock::new("GET", "/api/v1", "prefix").with_match_rule(MatchRule::Prefix),
            ActiveMock::new("GET", r"^/items/\d+$", "regex").with_match_rule(MatchRule::Regex),
        ]);
        assert_eq!(
            find_match(&Method::GET, &uri("/api/v1/users"), &reg)
                .unwrap()
                .unwrap()
                .user_context(),
            "prefix"
        );
        assert_eq!(
            find_match(&Method::GET, &uri("/items/12"), &reg)
                .unwrap()
                .unwrap()
                .user_context(),
            "regex"
        );
        assert!(find_match(&Method::GET, &uri("/items/abc"), &reg)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_first_declared_mock_wins() {
        let reg = registry(vec![
            ActiveMock::new("GET", "/orders/:id", "first"),
            ActiveMock::new("GET", "/orders/42", "second"),
        ]);
        let matched = find_match(&Method::GET, &uri("/orders/42"), &reg)
            .unwrap()
            .unwrap();
        assert_eq!(matched.user_context(), "first");
    }

    #[test]
    fn test_percent_encoded_path_is_decoded() {
        let reg = registry(vec![
            ActiveMock::new("GET", "/a b", "u").with_match_rule(MatchRule::Exact)
        ]);
        assert!(find_match(&Method::GET, &uri("/a%20b"), &reg)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_invalid_utf8_path_is_an_error() {
        let reg = registry(vec![ActiveMock::new("GET", "/x", "u")]);
        let err = find_match(&Method::GET, &uri("/%FF%FE"), &reg).unwrap_err();
        assert!(matches!(err, MatchError::MalformedPath { .. }));
    }
}
