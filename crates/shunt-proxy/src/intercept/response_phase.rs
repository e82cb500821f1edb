//! Response phase: runs once per chunk of the response headed for the client.
//!
//! The first chunk settles the request. A request flagged for substitution
//! calls the mock-serving component exactly once; the answer is cached on the
//! context and returned for every later chunk.

use super::context::{MockedResponse, Outcome, RequestContext};
use crate::invoker::{build_mock_url, MockCall, MockService};
use crate::live_log::{LiveLogEvent, LiveLogPublisher};
use crate::metrics::{self, outcome};
use crate::proxy::is_hop_by_hop;
use bytes::Bytes;
use hyper::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::StatusCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// One piece of a response as the transport delivers it.
#[derive(Debug, Clone, Copy)]
pub enum ResponseChunk<'a> {
    Head {
        status: StatusCode,
        headers: &'a HeaderMap,
    },
    Data(&'a Bytes),
    End,
}

#[derive(Debug, Clone)]
pub enum ChunkVerdict {
    /// Send the chunk on to the client unchanged.
    Forward,
    /// Send this response instead of the upstream's.
    Substitute(Arc<MockedResponse>),
}

pub struct ResponsePhase {
    invoker: Arc<dyn MockService>,
    publisher: LiveLogPublisher,
    mock_host: String,
    mock_port: u16,
}

impl ResponsePhase {
    pub fn new(
        invoker: Arc<dyn MockService>,
        publisher: LiveLogPublisher,
        mock_host: impl Into<String>,
        mock_port: u16,
    ) -> Self {
        Self {
            invoker,
            publisher,
            mock_host: mock_host.into(),
            mock_port,
        }
    }

    pub async fn on_chunk(
        &self,
        ctx: &mut RequestContext,
        chunk: ResponseChunk<'_>,
    ) -> ChunkVerdict {
        if let Some(cached) = ctx.cached_response() {
            return ChunkVerdict::Substitute(cached.clone());
        }

        if ctx.claim_inbound_log() {
            self.publisher.publish(LiveLogEvent::inbound(
                ctx.request_id(),
                ctx.method().as_str(),
                ctx.uri().to_string(),
                ctx.content_type().map(str::to_string),
                ctx.captured_body().map(str::to_string),
            ));
        }

        if let ResponseChunk::Head { status, headers } = chunk {
            if status == StatusCode::BAD_GATEWAY {
                self.on_gateway_failure(ctx, headers);
                return ChunkVerdict::Forward;
            }
        }

        if ctx.use_mock() && ctx.is_awaiting_resolution() {
            if let Some(mocked) = self.resolve_with_mock(ctx).await {
                return ChunkVerdict::Substitute(mocked);
            }
        }

        self.pass_through(ctx, chunk);
        ChunkVerdict::Forward
    }

    /// The response has been fully delivered to the client.
    pub fn on_stream_end(&self, ctx: &mut RequestContext) {
        if ctx.claim_outbound_log() {
            self.publisher.publish(LiveLogEvent::outbound(
                ctx.request_id(),
                ctx.response_status(),
                ctx.response_content_type().map(str::to_string),
                ctx.response_body_text(),
                true,
                ctx.cached_response().is_some(),
            ));
        }
    }

    /// The upstream body failed mid-stream; close out the exchange as a failure.
    pub fn on_stream_error(&self, ctx: &mut RequestContext) {
        if ctx.claim_outbound_log() {
            self.publisher.publish(LiveLogEvent::outbound(
                ctx.request_id(),
                ctx.response_status(),
                ctx.response_content_type().map(str::to_string),
                ctx.response_body_text(),
                false,
                false,
            ));
        }
    }

    fn on_gateway_failure(&self, ctx: &mut RequestContext, headers: &HeaderMap) {
        if ctx.claim_outbound_log() {
            self.publisher.publish(LiveLogEvent::outbound(
                ctx.request_id(),
                Some(StatusCode::BAD_GATEWAY.as_u16()),
                content_type(headers),
                None,
                false,
                false,
            ));
        }
        if ctx.resolve(Outcome::Passthrough) {
            metrics::record_outcome(ctx.method().as_str(), outcome::GATEWAY_ERROR);
        }
    }

    fn pass_through(&self, ctx: &mut RequestContext, chunk: ResponseChunk<'_>) {
        match chunk {
            ResponseChunk::Head { status, headers } => {
                ctx.record_response_head(status.as_u16(), content_type(headers));
                if ctx.resolve(Outcome::Passthrough) {
                    metrics::record_outcome(ctx.method().as_str(), outcome::PASSTHROUGH);
                }
            }
            ResponseChunk::Data(data) => {
                ctx.append_response_body(data, self.publisher.max_body_bytes());
            }
            ResponseChunk::End => self.on_stream_end(ctx),
        }
    }

    /// Ask the mock-serving component for a substitute. `None` means the real
    /// response goes through, either because the component declined or failed.
    async fn resolve_with_mock(&self, ctx: &mut RequestContext) -> Option<Arc<MockedResponse>> {
        let call = MockCall {
            method: ctx.method().clone(),
            url: build_mock_url(&self.mock_host, self.mock_port, ctx.user_ctx(), ctx.uri()),
            headers: ctx
                .captured_headers()
                .iter()
                .filter(|(name, _)| !is_hop_by_hop(name) && *name != CONTENT_LENGTH)
                .cloned()
                .collect(),
            body: ctx.captured_body().map(str::to_string),
        };
        let url = call.url.clone();
        let started = Instant::now();

        match self.invoker.invoke(call).await {
            Ok(response) if response.is_decline() => {
                metrics::record_mock_call("declined", elapsed_ms(started));
                debug!(
                    "[{}] Mock server declined {}, passing upstream response through",
                    ctx.request_id(),
                    url
                );
                ctx.resolve(Outcome::DeclinedRedirect);
                metrics::record_outcome(ctx.method().as_str(), outcome::DECLINED);
                None
            }
            Ok(response) => {
                metrics::record_mock_call("mocked", elapsed_ms(started));
                let mocked = Arc::new(MockedResponse::new(
                    response.status,
                    &response.headers,
                    response.body.clone(),
                ));
                ctx.resolve(Outcome::Mocked(mocked.clone()));
                metrics::record_outcome(ctx.method().as_str(), outcome::MOCKED);

                if ctx.claim_outbound_log() {
                    self.publisher.publish(LiveLogEvent::outbound(
                        ctx.request_id(),
                        Some(response.status.as_u16()),
                        response.content_type,
                        Some(String::from_utf8_lossy(&response.body).into_owned()),
                        true,
                        true,
                    ));
                }
                debug!(
                    "[{}] Substituted {} response from {}",
                    ctx.request_id(),
                    response.status,
                    url
                );
                Some(mocked)
            }
            Err(e) => {
                metrics::record_mock_call("error", elapsed_ms(started));
                error!("[{}] Error using mock substitute: {}", ctx.request_id(), e);
                ctx.resolve(Outcome::Passthrough);
                metrics::record_outcome(ctx.method().as_str(), outcome::MOCK_ERROR);
                None
            }
        }
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
