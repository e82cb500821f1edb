//! Active mock definitions as supplied by the persistence layer.

use serde::{Deserialize, Serialize};

/// A configured rule saying which requests get a substituted response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveMock {
    pub url_pattern: String,
    /// HTTP method name, or `*` for any method
    pub method: String,
    /// Opaque token selecting the caller's rule set on the mock-serving component
    #[serde(default)]
    pub user_context: String,
    #[serde(default)]
    pub match_rule: MatchRule,
}

impl ActiveMock {
    pub fn new(
        method: impl Into<String>,
        url_pattern: impl Into<String>,
        user_context: impl Into<String>,
    ) -> Self {
        Self {
            url_pattern: url_pattern.into(),
            method: method.into(),
            user_context: user_context.into(),
            match_rule: MatchRule::default(),
        }
    }

    pub fn with_match_rule(mut self, match_rule: MatchRule) -> Self {
        self.match_rule = match_rule;
        self
    }
}

/// How `url_pattern` is compared against the inbound request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchRule {
    Exact,
    /// Segments written `:name`, `{name}` or `*` match any single segment
    #[default]
    PathTemplate,
    Prefix,
    Regex,
}
