//! Prometheus metrics for the intercepting proxy.
//!
//! Tracks how each request was resolved and how the mock-serving component performs.
//! When enabled, the registry is served as `GET /metrics` on its own listener.
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Request outcome labels
pub mod outcome {
    pub const PASSTHROUGH: &str = "passthrough";
    pub const MOCKED: &str = "mocked";
    pub const DECLINED: &str = "declined";
    pub const BAD_REQUEST: &str = "bad_request";
    pub const GATEWAY_ERROR: &str = "gateway_error";
    pub const MOCK_ERROR: &str = "mock_error";
}

lazy_static! {
    /// Total number of intercepted requests by resolution
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "shunt_requests_total",
        "Total number of requests intercepted by the proxy",
        &["method", "outcome"]
    )
    .unwrap();

    /// Mock-serving call duration
    pub static ref MOCK_CALL_DURATION_MS: HistogramVec = register_histogram_vec!(
        "shunt_mock_call_duration_ms",
        "Histogram of mock-serving call time in milliseconds",
        &["result"],  // result: mocked|declined|error
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Requests rejected for exceeding the body buffer
    pub static ref OVERSIZED_REQUESTS_TOTAL: Counter = register_counter!(
        "shunt_oversized_requests_total",
        "Total number of requests rejected because the body exceeded the buffer limit"
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Serve `GET /metrics` until `shutdown` is cancelled.
pub async fn serve_metrics(listener: TcpListener, shutdown: CancellationToken) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    connections.spawn(async move {
                        let service = service_fn(|req| async move {
                            Ok::<_, Infallible>(handle_metrics_request(&req))
                        });
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("Error serving metrics to {}: {}", remote_addr, e);
                        }
                    });
                }
                Err(e) => warn!("Failed to accept metrics connection: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    connections.shutdown().await;
}

fn handle_metrics_request(req: &Request<Incoming>) -> Response<Full<Bytes>> {
    let (status, content_type, body) = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => (
            StatusCode::OK,
            "text/plain; version=0.0.4",
            collect_metrics(),
        ),
        _ => (StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}

pub fn record_outcome(method: &str, outcome: &str) {
    REQUESTS_TOTAL.with_label_values(&[method, outcome]).inc();
}

pub fn record_mock_call(result: &str, duration_ms: f64) {
    MOCK_CALL_DURATION_MS
        .with_label_values(&[result])
        .observe(duration_ms);
}

pub fn record_oversized_request() {
    OVERSIZED_REQUESTS_TOTAL.inc();
}
