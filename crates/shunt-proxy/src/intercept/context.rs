//! Per-request interception state.
//!
//! A `RequestContext` is created when the request phase fires, is owned by the
//! connection task serving that request, and is dropped once the response has
//! been delivered. The state transitions it allows are one-way.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING,
};
use hyper::{Method, Response, StatusCode, Uri};
use std::sync::Arc;
use uuid::Uuid;

/// A response produced by the mock-serving component, ready to send to the client.
#[derive(Debug, Clone)]
pub struct MockedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl MockedResponse {
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let mut headers = headers.clone();
        // Framing is recomputed for the substituted body
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);
        headers.remove(CONNECTION);
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// How a request was finally handled.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The real upstream response goes to the client.
    Passthrough,
    /// The mock-serving component supplied the response.
    Mocked(Arc<MockedResponse>),
    /// The mock-serving component declined with `307`; the real response goes through.
    DeclinedRedirect,
}

#[derive(Debug, Clone, Default)]
pub enum Resolution {
    #[default]
    AwaitingResolution,
    Resolved(Outcome),
}

#[derive(Debug, Default)]
pub struct LoggingState {
    inbound_logged: bool,
    outbound_logged: bool,
    response_status: Option<u16>,
    response_content_type: Option<String>,
    response_body: Vec<u8>,
}

#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    method: Method,
    uri: Uri,
    content_type: Option<String>,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<String>,
    use_mock: bool,
    user_ctx: String,
    resolution: Resolution,
    logging: LoggingState,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri, content_type: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method,
            uri,
            content_type,
            headers: Vec::new(),
            body: None,
            use_mock: false,
            user_ctx: String::new(),
            resolution: Resolution::AwaitingResolution,
            logging: LoggingState::default(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Flag the request for substitution. There is no way back.
    pub fn mark_for_mock(
        &mut self,
        user_ctx: impl Into<String>,
        headers: Vec<(HeaderName, HeaderValue)>,
        body: Option<String>,
    ) {
        self.use_mock = true;
        self.user_ctx = user_ctx.into();
        self.headers = headers;
        self.body = body;
    }

    pub fn use_mock(&self) -> bool {
        self.use_mock
    }

    pub fn user_ctx(&self) -> &str {
        &self.user_ctx
    }

    pub fn captured_headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    pub fn captured_body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn is_awaiting_resolution(&self) -> bool {
        matches!(self.resolution, Resolution::AwaitingResolution)
    }

    /// Settle the request. Returns false, leaving the first outcome in place, if already resolved.
    pub fn resolve(&mut self, outcome: Outcome) -> bool {
        if !self.is_awaiting_resolution() {
            return false;
        }
        self.resolution = Resolution::Resolved(outcome);
        true
    }

    pub fn cached_response(&self) -> Option<&Arc<MockedResponse>> {
        match &self.resolution {
            Resolution::Resolved(Outcome::Mocked(response)) => Some(response),
            _ => None,
        }
    }

    /// True exactly once: the first time the inbound event is claimed.
    pub fn claim_inbound_log(&mut self) -> bool {
        !std::mem::replace(&mut self.logging.inbound_logged, true)
    }

    /// True exactly once: the first time the outbound event is claimed.
    pub fn claim_outbound_log(&mut self) -> bool {
        !std::mem::replace(&mut self.logging.outbound_logged, true)
    }

    pub fn record_response_head(&mut self, status: u16, content_type: Option<String>) {
        self.logging.response_status = Some(status);
        self.logging.response_content_type = content_type;
    }

    /// Keep up to `limit` bytes of the response body for the outbound event.
    pub fn append_response_body(&mut self, chunk: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.logging.response_body.len());
        let take = room.min(chunk.len());
        self.logging.response_body.extend_from_slice(&chunk[..take]);
    }

    pub fn response_status(&self) -> Option<u16> {
        self.logging.response_status
    }

    pub fn response_content_type(&self) -> Option<&str> {
        self.logging.response_content_type.as_deref()
    }

    pub fn response_body_text(&self) -> Option<String> {
        if self.logging.response_body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.logging.response_body).into_owned())
        }
    }
}
