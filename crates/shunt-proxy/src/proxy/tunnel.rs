//! CONNECT handling: terminate the client's TLS with a certificate issued by
//! the MITM CA and serve the decrypted requests through the normal handler.

use super::forwarding::error_response;
use super::handler::ProxyHandler;
use super::response_ext::{ProxyBody, ResponseExt};
use crate::mitm::CaError;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::http::uri::Authority;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("no certificate for tunnel: {0}")]
    Certificate(#[from] CaError),

    #[error("TLS handshake with client failed: {0}")]
    Handshake(#[from] std::io::Error),

    #[error("CONNECT upgrade failed: {0}")]
    Upgrade(#[source] hyper::Error),

    #[error("error serving tunnel: {0}")]
    Http(#[from] hyper::Error),
}

/// Accept a CONNECT request. The tunnel is served on a task owned by the
/// running proxy instance once hyper hands over the upgraded connection, and
/// is torn down when that instance shuts down.
pub fn open(handler: Arc<ProxyHandler>, req: Request<Incoming>) -> Response<ProxyBody> {
    let Some(authority) = req.uri().authority().cloned() else {
        warn!("CONNECT without host:port target: {}", req.uri());
        return error_response(400, "CONNECT target must be host:port").into_boxed();
    };

    debug!("Opening MITM tunnel to {}", authority);
    let shutdown = handler.shutdown.clone();
    let tasks = handler.tasks.clone();
    tasks.spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => debug!("Closing tunnel to {} on shutdown", authority),
            result = serve_tunnel(handler, req, &authority) => {
                if let Err(e) = result {
                    warn!("Tunnel to {} closed with error: {}", authority, e);
                }
            }
        }
    });

    Response::new(
        Empty::<Bytes>::new()
            .map_err(|never: Infallible| match never {})
            .boxed_unsync(),
    )
}

async fn serve_tunnel(
    handler: Arc<ProxyHandler>,
    req: Request<Incoming>,
    authority: &Authority,
) -> Result<(), TunnelError> {
    let upgraded = hyper::upgrade::on(req)
        .await
        .map_err(TunnelError::Upgrade)?;
    intercept(handler, upgraded, authority.clone()).await
}

async fn intercept(
    handler: Arc<ProxyHandler>,
    upgraded: Upgraded,
    authority: Authority,
) -> Result<(), TunnelError> {
    let host = certificate_host(&authority);
    let server_config = handler.certificates.server_config(host).await?;

    let tls_stream = TlsAcceptor::from(server_config)
        .accept(TokioIo::new(upgraded))
        .await?;

    handler.serve_connection(tls_stream, Some(authority)).await?;
    Ok(())
}

/// Host name for the leaf certificate, without IPv6 brackets.
fn certificate_host(authority: &Authority) -> &str {
    authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']')
}
