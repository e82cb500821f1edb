//! Per-request flow: buffer the body, run the request phase, forward, and
//! stream the response back through the response phase.

use super::client::HttpClient;
use super::forwarding::{error_response, forward_request, upstream_target};
use super::headers::{ShuntHeadersExt, VALUE_TRUE, X_SHUNT_MOCKED};
use super::response_ext::{ProxyBody, ResponseExt};
use super::tunnel;
use crate::intercept::{
    ChunkVerdict, InboundRequest, Outcome, RequestContext, RequestPhase, RequestVerdict,
    ResponseChunk, ResponsePhase,
};
use crate::metrics::{self, outcome};
use crate::mitm::CertificateManager;
use http_body_util::{BodyExt, LengthLimitError, Limited, StreamBody};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::http::uri::Authority;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Everything a connection needs to intercept requests, shared by all
/// connections of one running proxy instance.
pub struct ProxyHandler {
    pub(crate) http_client: HttpClient,
    pub(crate) request_phase: RequestPhase,
    pub(crate) response_phase: Arc<ResponsePhase>,
    pub(crate) certificates: Arc<CertificateManager>,
    pub(crate) max_request_bytes: usize,
    /// Tag substituted responses with `x-shunt-mocked: true`
    pub(crate) mark_mocked: bool,
    /// Cancelled when the owning proxy instance shuts down
    pub(crate) shutdown: CancellationToken,
    /// Tasks that outlive their accepting connection, such as CONNECT tunnels
    pub(crate) tasks: TaskTracker,
}

enum BodyError {
    TooLarge,
    Read(String),
}

impl ProxyHandler {
    /// Serve HTTP/1.1 on `io`. `tunnel` is the CONNECT target when `io` is a
    /// decrypted tunnel rather than a client connection.
    pub async fn serve_connection<I>(
        self: Arc<Self>,
        io: I,
        tunnel: Option<Authority>,
    ) -> Result<(), hyper::Error>
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let service = service_fn(move |req| {
            let handler = Arc::clone(&self);
            let tunnel = tunnel.clone();
            async move { handler.handle_request(req, tunnel).await }
        });

        http1::Builder::new()
            .serve_connection(TokioIo::new(io), service)
            .with_upgrades()
            .await
    }

    /// Handle one request from a client connection or from inside a tunnel.
    pub async fn handle_request(
        self: Arc<Self>,
        req: Request<Incoming>,
        tunnel: Option<Authority>,
    ) -> Result<Response<ProxyBody>, Infallible> {
        if req.method() == Method::CONNECT && tunnel.is_none() {
            return Ok(tunnel::open(self, req));
        }

        let (parts, body) = req.into_parts();
        debug!("Received request: {} {}", parts.method, parts.uri);

        if declared_length(&parts.headers).is_some_and(|len| len > self.max_request_bytes) {
            return Ok(payload_too_large(&parts.method, &parts.uri));
        }

        let body = match read_body(body, self.max_request_bytes).await {
            Err(BodyError::TooLarge) => return Ok(payload_too_large(&parts.method, &parts.uri)),
            other => other,
        };

        let target = upstream_target(&parts.uri, &parts.headers, tunnel.as_ref());
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let log_uri = target.as_ref().unwrap_or(&parts.uri).clone();
        let mut ctx = RequestContext::new(parts.method.clone(), log_uri, content_type);

        let decoded = match (target, body) {
            (Ok(target), Ok(body)) => Ok((target, body)),
            (Err(reason), _) | (_, Err(BodyError::Read(reason))) => Err(reason),
            (_, Err(BodyError::TooLarge)) => Err("request body too large".to_string()),
        };

        let verdict = match &decoded {
            Ok((target, body)) => self.request_phase.on_request(
                &mut ctx,
                InboundRequest::Decoded {
                    method: &parts.method,
                    uri: target,
                    headers: &parts.headers,
                    body,
                },
            ),
            Err(reason) => self.request_phase.on_request(
                &mut ctx,
                InboundRequest::Undecodable {
                    reason: reason.clone(),
                },
            ),
        };

        let response = match (verdict, decoded) {
            (RequestVerdict::PassThrough, Ok((target, body))) => {
                forward_request(
                    &self.http_client,
                    parts.method.clone(),
                    target,
                    &parts.headers,
                    body,
                )
                .await
            }
            (RequestVerdict::BadRequest(response), _) => bad_request(&mut ctx, response),
            (RequestVerdict::PassThrough, Err(_)) => {
                bad_request(&mut ctx, error_response(400, "Bad Request"))
            }
        };

        Ok(self.respond(ctx, response).await)
    }

    /// Run the response phase over the head, then over each body frame as it
    /// streams to the client.
    async fn respond(
        &self,
        mut ctx: RequestContext,
        response: Response<ProxyBody>,
    ) -> Response<ProxyBody> {
        let (parts, body) = response.into_parts();

        let head = ResponseChunk::Head {
            status: parts.status,
            headers: &parts.headers,
        };
        let verdict = self.response_phase.on_chunk(&mut ctx, head).await;
        if let ChunkVerdict::Substitute(mocked) = verdict {
            // The upstream body is dropped unread
            let mut response = mocked.to_response();
            if self.mark_mocked {
                response.set_header(&X_SHUNT_MOCKED, &VALUE_TRUE);
            }
            return response.into_boxed();
        }

        let state = ResponseStream {
            body,
            ctx,
            phase: Arc::clone(&self.response_phase),
            finished: false,
        };
        let frames = futures::stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            match state.body.frame().await {
                Some(Ok(frame)) => {
                    if let Some(data) = frame.data_ref() {
                        // The head is already on the wire, so only Forward can apply here
                        state
                            .phase
                            .on_chunk(&mut state.ctx, ResponseChunk::Data(data))
                            .await;
                    }
                    // hyper stops polling once a sized body is fully written
                    if state.body.is_end_stream() {
                        state.finish().await;
                    }
                    Some((Ok(frame), state))
                }
                Some(Err(e)) => {
                    warn!("[{}] Upstream body failed: {}", state.ctx.request_id(), e);
                    state.phase.on_stream_error(&mut state.ctx);
                    state.finished = true;
                    Some((Err(e), state))
                }
                None => {
                    state.finish().await;
                    None
                }
            }
        });

        Response::from_parts(parts, StreamBody::new(frames).boxed_unsync())
    }
}

/// Upstream body on its way to the client, with the context the response
/// phase needs for each frame.
struct ResponseStream {
    body: ProxyBody,
    ctx: RequestContext,
    phase: Arc<ResponsePhase>,
    finished: bool,
}

impl ResponseStream {
    async fn finish(&mut self) {
        self.phase.on_chunk(&mut self.ctx, ResponseChunk::End).await;
        self.finished = true;
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Bodies hyper never polls (HEAD, empty) end here; anything else was cut off
        if self.body.is_end_stream() {
            self.phase.on_stream_end(&mut self.ctx);
        } else {
            debug!("[{}] Response abandoned before completion", self.ctx.request_id());
            self.phase.on_stream_error(&mut self.ctx);
        }
    }
}

fn declared_length(headers: &hyper::HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

async fn read_body(body: Incoming, limit: usize) -> Result<Bytes, BodyError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(BodyError::TooLarge),
        Err(e) => Err(BodyError::Read(format!("failed to read request body: {e}"))),
    }
}

fn payload_too_large(method: &Method, uri: &Uri) -> Response<ProxyBody> {
    warn!("Rejecting {} {}: body exceeds the request buffer", method, uri);
    metrics::record_oversized_request();
    error_response(413, "Payload Too Large").into_boxed()
}

fn bad_request(
    ctx: &mut RequestContext,
    response: Response<http_body_util::Full<Bytes>>,
) -> Response<ProxyBody> {
    if ctx.resolve(Outcome::Passthrough) {
        metrics::record_outcome(ctx.method().as_str(), outcome::BAD_REQUEST);
    }
    response.into_boxed()
}
