//! Compiled, read-only snapshot of the active mocks.

use super::types::{ActiveMock, MatchRule};
use hyper::Method;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("mock {index} ({pattern}): invalid method '{method}'")]
    InvalidMethod {
        index: usize,
        pattern: String,
        method: String,
    },
    #[error("mock {index}: invalid regex '{pattern}': {source}")]
    InvalidRegex {
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug)]
pub(crate) enum PathMatcher {
    Exact(String),
    Template(Vec<Segment>),
    Prefix(String),
    Regex(Regex),
}

#[derive(Debug)]
pub(crate) enum Segment {
    Literal(String),
    Param,
}

/// A mock with its method and path pattern compiled for matching.
#[derive(Debug)]
pub struct CompiledMock {
    pub mock: ActiveMock,
    /// `None` matches any method
    pub(crate) method: Option<Method>,
    pub(crate) path_matcher: PathMatcher,
}

impl CompiledMock {
    pub fn compile(index: usize, mock: ActiveMock) -> Result<Self, RegistryError> {
        let method = match mock.method.trim() {
            "*" | "" => None,
            m => Some(m.to_ascii_uppercase().parse::<Method>().map_err(|_| {
                RegistryError::InvalidMethod {
                    index,
                    pattern: mock.url_pattern.clone(),
                    method: mock.method.clone(),
                }
            })?),
        };

        let path_matcher = match mock.match_rule {
            MatchRule::Exact => PathMatcher::Exact(normalize_path(&mock.url_pattern).to_string()),
            MatchRule::Prefix => PathMatcher::Prefix(mock.url_pattern.clone()),
            MatchRule::PathTemplate => PathMatcher::Template(
                normalize_path(&mock.url_pattern)
                    .split('/')
                    .map(|segment| {
                        let is_param = segment == "*"
                            || (segment.len() > 1 && segment.starts_with(':'))
                            || (segment.len() > 2
                                && segment.starts_with('{')
                                && segment.ends_with('}'));
                        if is_param {
                            Segment::Param
                        } else {
                            Segment::Literal(segment.to_string())
                        }
                    })
                    .collect(),
            ),
            MatchRule::Regex => PathMatcher::Regex(Regex::new(&mock.url_pattern).map_err(
                |source| RegistryError::InvalidRegex {
                    index,
                    pattern: mock.url_pattern.clone(),
                    source,
                },
            )?),
        };

        Ok(Self {
            mock,
            method,
            path_matcher,
        })
    }

    pub fn user_context(&self) -> &str {
        &self.mock.user_context
    }
}

/// Immutable registry consulted by the matcher for the life of a proxy instance.
#[derive(Debug, Default)]
pub struct MockRegistry {
    mocks: Vec<CompiledMock>,
}

impl MockRegistry {
    pub fn new(mocks: Vec<ActiveMock>) -> Result<Self, RegistryError> {
        let mocks = mocks
            .into_iter()
            .enumerate()
            .map(|(index, mock)| CompiledMock::compile(index, mock))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { mocks })
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledMock> {
        self.mocks.iter()
    }

    pub fn len(&self) -> usize {
        self.mocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }
}

/// Strip a trailing slash so `/orders/` and `/orders` compare equal.
pub(crate) fn normalize_path(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}
