//! HTTP client used to reach the real upstreams.

use super::tls::{crypto_provider, NoVerifier};
use crate::config::UpstreamConfig;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Type alias for the HTTP client used by the proxy.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Create the shared upstream client with connection pooling.
///
/// Upstream certificates are checked against the webpki roots unless
/// `tls_skip_verify` is set.
pub fn create_http_client(config: &UpstreamConfig) -> Result<HttpClient, rustls::Error> {
    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(config.keepalive_timeout_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
    http_connector.enforce_http(false); // Allow both HTTP and HTTPS

    let https_connector = if config.tls_skip_verify {
        warn!("Upstream TLS certificate verification DISABLED (development/testing only)");
        let tls = rustls::ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    } else {
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    };

    let http_client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .pool_max_idle_per_host(config.max_idle_per_host)
        .build(https_connector);

    info!(
        "Upstream pool (HTTP/1.1): max_idle={}, idle_timeout={}s, keepalive={}s",
        config.max_idle_per_host, config.idle_timeout_secs, config.keepalive_timeout_secs
    );

    Ok(http_client)
}
