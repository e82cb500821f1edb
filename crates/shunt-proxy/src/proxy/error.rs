//! Errors surfaced by the proxy engine lifecycle.

use crate::invoker::InvokeError;
use crate::mitm::CaError;
use crate::mocks::RegistryError;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy failed to start: {0}")]
    Startup(#[from] StartupError),

    #[error("proxy failed to shut down: {0}")]
    Shutdown(String),
}

/// Why `start` gave up. No listener is left bound in any of these cases.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("proxy is already running on port {0}")]
    AlreadyRunning(u16),

    #[error("invalid active mock: {0}")]
    InvalidMock(#[from] RegistryError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("MITM certificate authority unavailable: {0}")]
    Mitm(#[from] CaError),

    #[error("cannot build upstream client: {0}")]
    UpstreamClient(#[from] rustls::Error),

    #[error("cannot build mock-serving client: {0}")]
    MockClient(#[from] InvokeError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
}
