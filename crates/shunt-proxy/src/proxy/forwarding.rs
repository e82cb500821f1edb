//! Request forwarding to the real upstream.

use super::client::HttpClient;
use super::headers::is_hop_by_hop;
use super::response_ext::{ProxyBody, ResponseExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::http::uri::{Authority, Scheme};
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use tracing::{debug, error};

/// Helper function to create an error response.
pub fn error_response(status: u16, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Work out the absolute upstream URI for a request.
///
/// Inside a CONNECT tunnel the target is `https://{tunnel authority}{path}`.
/// Otherwise the request must use absolute form, or carry a `Host` header.
pub fn upstream_target(
    uri: &Uri,
    headers: &HeaderMap,
    tunnel: Option<&Authority>,
) -> Result<Uri, String> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let (scheme, authority) = if let Some(authority) = tunnel {
        (Scheme::HTTPS, authority.clone())
    } else if let (Some(scheme), Some(authority)) = (uri.scheme(), uri.authority()) {
        (scheme.clone(), authority.clone())
    } else {
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| format!("no upstream host for '{uri}'"))?;
        let authority = host
            .parse::<Authority>()
            .map_err(|e| format!("invalid Host header '{host}': {e}"))?;
        (Scheme::HTTP, authority)
    };

    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| format!("cannot build upstream URI: {e}"))
}

/// Forward a request with a pre-collected body, streaming the response back.
///
/// Transport failures become a synthesized `502 Bad Gateway`.
pub async fn forward_request(
    http_client: &HttpClient,
    method: Method,
    target: Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Response<ProxyBody> {
    debug!("Forwarding to: {} {}", method, target);

    let mut upstream_req = Request::new(Full::new(body));
    *upstream_req.method_mut() = method;
    *upstream_req.uri_mut() = target.clone();
    for (key, value) in headers.iter() {
        if !is_hop_by_hop(key) {
            upstream_req.headers_mut().append(key, value.clone());
        }
    }

    match http_client.request(upstream_req).await {
        Ok(upstream_response) => upstream_response.map(|body| body.boxed_unsync()),
        Err(e) => {
            error!("Failed to forward request to upstream {}: {}", target, e);
            error_response(502, "Bad Gateway").into_boxed()
        }
    }
}
