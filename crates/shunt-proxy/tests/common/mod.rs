//! Shared fixtures: canned servers standing in for the real upstream and the
//! mock-serving component, plus a proxy engine wired up against them.

#![allow(dead_code)]

use bytes::Bytes;
use futures::StreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{CONTENT_TYPE, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use shunt_proxy::mitm::{CertificateAuthority, CertificateManager};
use shunt_proxy::{ActiveMock, Config, LiveLogEvent, ProxyEngine};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A request as a canned server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What a canned server answers with.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub chunks: Vec<&'static str>,
    /// Stream each chunk after this delay instead of sending a sized body
    pub chunk_delay: Option<Duration>,
    pub location: Option<&'static str>,
}

impl Reply {
    pub fn json(status: u16, body: &'static str) -> Self {
        Self {
            status,
            content_type: "application/json",
            chunks: vec![body],
            chunk_delay: None,
            location: None,
        }
    }

    pub fn text(status: u16, body: &'static str) -> Self {
        Self {
            content_type: "text/plain",
            ..Self::json(status, body)
        }
    }

    pub fn chunked(chunks: Vec<&'static str>) -> Self {
        Self {
            status: 200,
            content_type: "text/plain",
            chunks,
            chunk_delay: Some(Duration::from_millis(20)),
            location: None,
        }
    }

    /// The mock-serving component's "not mocked" answer.
    pub fn decline() -> Self {
        Self {
            location: Some("http://upstream.invalid/"),
            ..Self::text(307, "")
        }
    }

    fn render(&self) -> Response<UnsyncBoxBody<Bytes, Infallible>> {
        let body = match self.chunk_delay {
            None => Full::new(Bytes::from(self.chunks.concat())).boxed_unsync(),
            Some(delay) => {
                let frames =
                    futures::stream::iter(self.chunks.clone()).then(move |chunk| async move {
                        tokio::time::sleep(delay).await;
                        Ok::<_, Infallible>(Frame::data(Bytes::from_static(chunk.as_bytes())))
                    });
                StreamBody::new(frames).boxed_unsync()
            }
        };

        let mut response = Response::builder()
            .status(self.status)
            .header(CONTENT_TYPE, self.content_type);
        if let Some(location) = self.location {
            response = response.header(LOCATION, location);
        }
        response.body(body).unwrap()
    }
}

/// A canned HTTP(S) server on an ephemeral localhost port.
pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(reply: Reply) -> Self {
        Self::spawn(reply, None).await
    }

    /// Serve over TLS with a leaf for 127.0.0.1 issued by a throwaway CA.
    pub async fn start_tls(reply: Reply, ca_dir: &TempDir) -> Self {
        let ca = CertificateAuthority::load_or_generate(ca_dir.path()).unwrap();
        let certificates = CertificateManager::new(ca, 4);
        let server_config = certificates.server_config("127.0.0.1").await.unwrap();
        Self::spawn(reply, Some(TlsAcceptor::from(server_config))).await
    }

    async fn spawn(reply: Reply, tls: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let reply = reply.clone();
                let recorded = Arc::clone(&recorded);
                let tls = tls.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let reply = reply.clone();
                        let recorded = Arc::clone(&recorded);
                        async move {
                            record(req, &recorded).await;
                            Ok::<_, Infallible>(reply.render())
                        }
                    });
                    match tls {
                        Some(acceptor) => {
                            if let Ok(stream) = acceptor.accept(stream).await {
                                let _ = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service)
                                    .await;
                            }
                        }
                        None => {
                            let _ = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service)
                                .await;
                        }
                    }
                });
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn record(req: Request<Incoming>, recorded: &Mutex<Vec<Recorded>>) {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();
    recorded.lock().push(Recorded {
        method: parts.method.to_string(),
        uri: parts.uri.to_string(),
        headers: parts.headers,
        body,
    });
}

/// A started proxy engine and the directory holding its CA.
pub struct Harness {
    pub engine: ProxyEngine,
    pub port: u16,
    pub events: broadcast::Receiver<LiveLogEvent>,
    _ca_dir: TempDir,
}

impl Harness {
    pub async fn start(mock_port: u16, mocks: Vec<ActiveMock>) -> Self {
        Self::start_with(mock_port, mocks, |_| {}).await
    }

    pub async fn start_with(
        mock_port: u16,
        mocks: Vec<ActiveMock>,
        customize: impl FnOnce(&mut Config),
    ) -> Self {
        let ca_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.listen.host = "127.0.0.1".to_string();
        config.mock_server.host = "127.0.0.1".to_string();
        config.mitm.ca_storage_path = ca_dir.path().to_path_buf();
        customize(&mut config);

        let engine = ProxyEngine::new(config);
        let events = engine.subscribe();
        engine.start(0, mock_port, mocks).await.unwrap();
        let port = engine.current_state().await.port;

        Self {
            engine,
            port,
            events,
            _ca_dir: ca_dir,
        }
    }

    /// A client sending every request, plain or tunnelled, through the proxy.
    pub fn client(&self) -> reqwest::Client {
        self.client_builder().build().unwrap()
    }

    pub fn client_builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(format!("http://127.0.0.1:{}", self.port)).unwrap())
            .timeout(Duration::from_secs(10))
    }

    pub async fn next_event(&mut self) -> LiveLogEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for live-log event")
            .expect("live-log channel closed")
    }

    /// Give stragglers a moment, then assert nothing else was published.
    pub async fn assert_no_more_events(&mut self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(event) = self.events.try_recv() {
            panic!("unexpected live-log event: {event:?}");
        }
    }

    pub async fn stop(self) {
        self.engine.shutdown().await.unwrap();
    }
}
