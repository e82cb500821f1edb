//! Call-out to the mock-serving component.
//!
//! A matched request is replayed against the mock-serving component with its
//! host and port replaced and its path prefixed by the caller's user context.
//! The component answers with the substitute response, or `307` to decline.

use crate::config::MockServerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Method, StatusCode, Uri};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

/// Status the mock-serving component uses to say "no rule applies".
pub const DECLINE_STATUS: StatusCode = StatusCode::TEMPORARY_REDIRECT;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("mock-serving call to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("mock-serving call to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build mock-serving client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("mock-serving call limiter closed")]
    Closed,
}

/// Outbound call description for one intercepted request.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Option<String>,
}

/// What the mock-serving component answered.
#[derive(Debug, Clone)]
pub struct MockServerResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl MockServerResponse {
    pub fn is_decline(&self) -> bool {
        self.status == DECLINE_STATUS
    }
}

/// Something that can answer a [`MockCall`].
#[async_trait]
pub trait MockService: Send + Sync {
    async fn invoke(&self, call: MockCall) -> Result<MockServerResponse, InvokeError>;
}

/// Build the mock-serving URL for a request: `http://{host}:{port}[/{user_ctx}]{path}[?{query}]`.
pub fn build_mock_url(host: &str, port: u16, user_ctx: &str, uri: &Uri) -> String {
    let mut url = format!("http://{host}:{port}");
    if !user_ctx.is_empty() {
        url.push('/');
        url.push_str(&urlencoding::encode(user_ctx));
    }
    url.push_str(uri.path());
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// [`MockService`] speaking HTTP via `reqwest`, with a required timeout and
/// a cap on concurrent calls.
pub struct HttpMockInvoker {
    client: reqwest::Client,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl HttpMockInvoker {
    pub fn new(timeout: Duration, max_in_flight: usize) -> Result<Self, InvokeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            // 307 is an answer, not something to follow
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(InvokeError::Client)?;

        Ok(Self {
            client,
            timeout,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        })
    }

    pub fn from_config(config: &MockServerConfig) -> Result<Self, InvokeError> {
        Self::new(config.timeout(), config.max_in_flight)
    }
}

#[async_trait]
impl MockService for HttpMockInvoker {
    async fn invoke(&self, call: MockCall) -> Result<MockServerResponse, InvokeError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| InvokeError::Closed)?;

        debug!("Calling mock server: {} {}", call.method, call.url);

        let mut request = self.client.request(call.method, &call.url);
        for (name, value) in call.headers {
            request = request.header(name, value);
        }
        if let Some(body) = call.body {
            request = request.body(body);
        }

        let url = call.url;
        let response = request.send().await.map_err(|e| classify(e, &url, self.timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| classify(e, &url, self.timeout))?;

        Ok(MockServerResponse {
            status,
            headers,
            content_type,
            body,
        })
    }
}

fn classify(err: reqwest::Error, url: &str, timeout: Duration) -> InvokeError {
    if err.is_timeout() {
        InvokeError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        InvokeError::Transport {
            url: url.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_mock_url_with_user_context() {
        let uri: Uri = "http://shop.test:9000/checkout?step=2".parse().unwrap();
        assert_eq!(
            build_mock_url("127.0.0.1", 8001, "U", &uri),
            "http://127.0.0.1:8001/U/checkout?step=2"
        );
    }

    #[test]
    fn test_build_mock_url_without_user_context() {
        let uri: Uri = "/orders/42".parse().unwrap();
        assert_eq!(
            build_mock_url("localhost", 8001, "", &uri),
            "http://localhost:8001/orders/42"
        );
    }

    #[test]
    fn test_build_mock_url_encodes_user_context() {
        let uri: Uri = "/a".parse().unwrap();
        assert_eq!(
            build_mock_url("h", 1, "team a", &uri),
            "http://h:1/team%20a/a"
        );
    }

    #[test]
    fn test_decline_status() {
        let response = MockServerResponse {
            status: StatusCode::TEMPORARY_REDIRECT,
            headers: HeaderMap::new(),
            content_type: None,
            body: Bytes::new(),
        };
        assert!(response.is_decline());
    }

    #[tokio::test]
    async fn test_unreachable_mock_server_is_an_error() {
        // Port 9 (discard) is closed on test machines
        let invoker = HttpMockInvoker::new(Duration::from_millis(500), 1).unwrap();
        let call = MockCall {
            method: Method::GET,
            url: "http://127.0.0.1:9/x".to_string(),
            headers: Vec::new(),
            body: None,
        };
        assert!(invoker.invoke(call).await.is_err());
    }
}
