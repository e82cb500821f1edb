//! ProxyEngine: lifecycle and accept loop.
//!
//! One engine runs at most one proxy instance at a time. `start`, `shutdown`
//! and `current_state` all go through the same lock, so observers never see
//! a half-started or half-stopped engine.

use super::client::create_http_client;
use super::error::{ProxyError, StartupError};
use super::handler::ProxyHandler;
use super::network::create_reusable_listener;
use super::state::ServerState;
use crate::config::Config;
use crate::intercept::{RequestPhase, ResponsePhase};
use crate::invoker::{HttpMockInvoker, MockService};
use crate::live_log::{LiveLogEvent, LiveLogPublisher, LiveLogSink};
use crate::metrics::serve_metrics;
use crate::mitm::{CaError, CertificateAuthority, CertificateManager};
use crate::mocks::{ActiveMock, MockRegistry};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// The intercepting proxy.
pub struct ProxyEngine {
    config: Config,
    publisher: LiveLogPublisher,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    state: ServerState,
    running: Option<RunningProxy>,
}

struct RunningProxy {
    shutdown: CancellationToken,
    accept_loop: JoinHandle<()>,
    metrics_port: Option<u16>,
}

impl ProxyEngine {
    pub fn new(config: Config) -> Self {
        let publisher = LiveLogPublisher::new(
            config.live_log.channel_capacity,
            config.live_log.max_body_bytes,
        );
        Self {
            config,
            publisher,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Bind `proxy_port` (0 picks a free port) and start intercepting against
    /// the given mock snapshot, calling the mock-serving component on
    /// `mock_server_port`.
    pub async fn start(
        &self,
        proxy_port: u16,
        mock_server_port: u16,
        active_mocks: Vec<ActiveMock>,
    ) -> Result<(), ProxyError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state.running {
            return Err(StartupError::AlreadyRunning(lifecycle.state.port).into());
        }

        let (running, port) = self
            .launch(proxy_port, mock_server_port, active_mocks)
            .await?;

        lifecycle.running = Some(running);
        lifecycle.state = ServerState::running(port);
        Ok(())
    }

    /// Stop the running instance and wait for its listeners, connections and
    /// tunnels to close.
    /// A no-op when nothing is running.
    pub async fn shutdown(&self) -> Result<(), ProxyError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.running.take() else {
            debug!("Shutdown requested but proxy is not running");
            return Ok(());
        };
        let port = lifecycle.state.port;
        lifecycle.state = ServerState::stopped();

        running.shutdown.cancel();
        running
            .accept_loop
            .await
            .map_err(|e| ProxyError::Shutdown(format!("accept loop on port {port} failed: {e}")))?;

        info!("Proxy on port {} stopped", port);
        Ok(())
    }

    pub async fn current_state(&self) -> ServerState {
        self.lifecycle.lock().await.state
    }

    /// Port of the `/metrics` listener, when running with metrics enabled.
    pub async fn metrics_port(&self) -> Option<u16> {
        self.lifecycle
            .lock()
            .await
            .running
            .as_ref()
            .and_then(|running| running.metrics_port)
    }

    /// Receive live-log events from every request intercepted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveLogEvent> {
        self.publisher.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn LiveLogSink>) {
        self.publisher.add_sink(sink);
    }

    /// PEM of the MITM root CA, generating it if the storage directory has none.
    pub fn ca_cert_pem(&self) -> Result<String, CaError> {
        CertificateAuthority::load_or_generate(&self.config.mitm.ca_storage_path)
            .map(|ca| ca.ca_cert_pem().to_string())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build everything a proxy instance needs, bind last, then spawn the loop.
    async fn launch(
        &self,
        proxy_port: u16,
        mock_server_port: u16,
        active_mocks: Vec<ActiveMock>,
    ) -> Result<(RunningProxy, u16), StartupError> {
        let registry = Arc::new(MockRegistry::new(active_mocks)?);
        let excluded_methods = self
            .config
            .excluded_method_set()
            .map_err(|e| StartupError::InvalidConfig(e.to_string()))?;

        let ca = CertificateAuthority::load_or_generate(&self.config.mitm.ca_storage_path)?;
        let certificates = Arc::new(CertificateManager::new(
            ca,
            self.config.mitm.cert_cache_capacity,
        ));

        let http_client = create_http_client(&self.config.upstream)?;
        let invoker: Arc<dyn MockService> =
            Arc::new(HttpMockInvoker::from_config(&self.config.mock_server)?);

        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let handler = Arc::new(ProxyHandler {
            http_client,
            request_phase: RequestPhase::new(Arc::clone(&registry), excluded_methods),
            response_phase: Arc::new(ResponsePhase::new(
                invoker,
                self.publisher.clone(),
                self.config.mock_server.host.clone(),
                mock_server_port,
            )),
            certificates,
            max_request_bytes: self.config.listen.max_request_buffer_bytes,
            mark_mocked: self.config.mock_server.mark_mocked_responses,
            shutdown: shutdown.clone(),
            tasks: tasks.clone(),
        });

        let ip: IpAddr = self
            .config
            .listen
            .host
            .parse()
            .map_err(|_| StartupError::InvalidAddress(self.config.listen.host.clone()))?;
        let addr = SocketAddr::new(ip, proxy_port);
        let listener =
            create_reusable_listener(addr).map_err(|source| StartupError::Bind { addr, source })?;
        let bound = listener
            .local_addr()
            .map_err(|source| StartupError::Bind { addr, source })?;

        let metrics_listener = if self.config.metrics.enabled {
            let addr = SocketAddr::new(ip, self.config.metrics.port);
            let listener = create_reusable_listener(addr)
                .map_err(|source| StartupError::Bind { addr, source })?;
            let bound = listener
                .local_addr()
                .map_err(|source| StartupError::Bind { addr, source })?;
            Some((listener, bound))
        } else {
            None
        };

        info!("Listening on http://{}", bound);
        info!(
            "Mock server at {}:{} (timeout {}ms)",
            self.config.mock_server.host, mock_server_port, self.config.mock_server.timeout_ms
        );
        info!("Loaded {} active mocks", registry.len());

        let metrics_port = metrics_listener.map(|(listener, metrics_addr)| {
            info!("Metrics on http://{}/metrics", metrics_addr);
            tasks.spawn(serve_metrics(listener, shutdown.clone()));
            metrics_addr.port()
        });

        let accept_loop = tokio::spawn(accept_loop(listener, handler, shutdown.clone()));

        Ok((
            RunningProxy {
                shutdown,
                accept_loop,
                metrics_port,
            },
            bound.port(),
        ))
    }
}

/// Accept connections until told to stop, then close the listener and every
/// connection, tunnel and background task still open.
async fn accept_loop(
    listener: TcpListener,
    handler: Arc<ProxyHandler>,
    shutdown: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    let handler = Arc::clone(&handler);
                    connections.spawn(async move {
                        if let Err(err) = handler.serve_connection(stream, None).await {
                            debug!("Error serving connection from {}: {}", remote_addr, err);
                        }
                    });
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        warn!("Connection task panicked: {}", e);
                    }
                }
            }
        }
    }

    drop(listener);
    connections.shutdown().await;

    // Tunnels and the metrics listener watch the same token
    handler.tasks.close();
    handler.tasks.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(dir: &tempfile::TempDir) -> ProxyEngine {
        let mut config = Config::default();
        config.listen.host = "127.0.0.1".to_string();
        config.mitm.ca_storage_path = dir.path().to_path_buf();
        ProxyEngine::new(config)
    }

    #[tokio::test]
    async fn test_state_before_and_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        assert_eq!(engine.current_state().await, ServerState::stopped());

        engine.start(0, 8001, Vec::new()).await.unwrap();
        let state = engine.current_state().await;
        assert!(state.running);
        assert_ne!(state.port, 0);

        engine.shutdown().await.unwrap();
        assert!(!engine.current_state().await.running);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        engine.shutdown().await.unwrap();
        engine.shutdown().await.unwrap();
        assert!(!engine.current_state().await.running);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        engine.start(0, 8001, Vec::new()).await.unwrap();

        let err = engine.start(0, 8001, Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Startup(StartupError::AlreadyRunning(_))
        ));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_mock_fails_start_without_binding() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let mocks = vec![ActiveMock::new("NOT A METHOD", "/x", "u")];

        let err = engine.start(0, 8001, mocks).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Startup(StartupError::InvalidMock(_))
        ));
        assert_eq!(engine.current_state().await, ServerState::stopped());
    }

    #[tokio::test]
    async fn test_port_in_use_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let engine = engine(&dir);

        let err = engine.start(port, 8001, Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Startup(StartupError::Bind { .. })
        ));
        assert!(!engine.current_state().await.running);
    }

    #[tokio::test]
    async fn test_metrics_listener_follows_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.listen.host = "127.0.0.1".to_string();
        config.mitm.ca_storage_path = dir.path().to_path_buf();
        config.metrics.enabled = true;
        config.metrics.port = 0;
        let engine = ProxyEngine::new(config);
        assert_eq!(engine.metrics_port().await, None);

        engine.start(0, 8001, Vec::new()).await.unwrap();
        let port = engine.metrics_port().await.unwrap();
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_ok());

        engine.shutdown().await.unwrap();
        assert_eq!(engine.metrics_port().await, None);
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_metrics_disabled_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        engine.start(0, 8001, Vec::new()).await.unwrap();
        assert_eq!(engine.metrics_port().await, None);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ca_cert_pem_available_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        assert!(engine.ca_cert_pem().unwrap().contains("BEGIN CERTIFICATE"));
    }
}
