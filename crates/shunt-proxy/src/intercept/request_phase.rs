//! Request phase: runs once per inbound request and decides whether the
//! request is a candidate for substitution.

use super::context::RequestContext;
use crate::mocks::{find_match, MockRegistry};
use crate::proxy::error_response;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{HeaderMap, Method, Response, Uri};
use std::sync::Arc;
use tracing::{debug, warn};

/// The inbound request as the transport delivered it.
pub enum InboundRequest<'a> {
    Decoded {
        method: &'a Method,
        uri: &'a Uri,
        headers: &'a HeaderMap,
        body: &'a Bytes,
    },
    /// The request could not be decoded (unreadable body, no resolvable target).
    Undecodable { reason: String },
}

#[derive(Debug)]
pub enum RequestVerdict {
    /// Answer with this synthesized response instead of contacting the upstream.
    BadRequest(Response<Full<Bytes>>),
    /// Send the request to the real upstream unmodified.
    PassThrough,
}

pub struct RequestPhase {
    registry: Arc<MockRegistry>,
    excluded_methods: Vec<Method>,
}

impl RequestPhase {
    pub fn new(registry: Arc<MockRegistry>, excluded_methods: Vec<Method>) -> Self {
        Self {
            registry,
            excluded_methods,
        }
    }

    pub fn on_request(
        &self,
        ctx: &mut RequestContext,
        inbound: InboundRequest<'_>,
    ) -> RequestVerdict {
        let (method, uri, headers, body) = match inbound {
            InboundRequest::Decoded {
                method,
                uri,
                headers,
                body,
            } => (method, uri, headers, body),
            InboundRequest::Undecodable { reason } => {
                warn!("[{}] Rejecting undecodable request: {}", ctx.request_id(), reason);
                return RequestVerdict::BadRequest(error_response(400, "Bad Request"));
            }
        };

        if self.excluded_methods.contains(method) {
            debug!("[{}] {} is never mocked", ctx.request_id(), method);
            return RequestVerdict::PassThrough;
        }

        let matched = match find_match(method, uri, &self.registry) {
            Ok(Some(matched)) => matched,
            Ok(None) => return RequestVerdict::PassThrough,
            Err(e) => {
                warn!("[{}] Skipping mock lookup: {}", ctx.request_id(), e);
                return RequestVerdict::PassThrough;
            }
        };

        debug!(
            "[{}] {} {} matched mock '{}' (userCtx '{}')",
            ctx.request_id(),
            method,
            uri,
            matched.mock.url_pattern,
            matched.user_context()
        );

        let captured_headers = headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        // Only POST bodies are forwarded to the mock-serving component
        let captured_body = (*method == Method::POST)
            .then(|| String::from_utf8_lossy(body).into_owned());

        ctx.mark_for_mock(matched.user_context(), captured_headers, captured_body);
        RequestVerdict::PassThrough
    }
}
