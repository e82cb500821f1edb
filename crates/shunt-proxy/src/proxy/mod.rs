//! Proxy engine module.
//!
//! # Module Structure
//!
//! - `server` - ProxyEngine lifecycle and accept loop
//! - `handler` - Per-request flow through the interception phases
//! - `tunnel` - CONNECT handling and TLS interception
//! - `forwarding` - Request forwarding to upstream servers
//! - `client` - Upstream HTTP client creation
//! - `tls` - Crypto provider and certificate verifier
//! - `network` - Listener creation

mod client;
mod error;
mod forwarding;
mod handler;
mod headers;
mod network;
mod response_ext;
mod server;
mod state;
mod tls;
mod tunnel;

pub use error::{ProxyError, StartupError};
pub use forwarding::error_response;
pub use headers::{is_hop_by_hop, X_SHUNT_MOCKED};
pub use response_ext::ProxyBody;
pub use server::ProxyEngine;
pub use state::ServerState;
pub use tls::crypto_provider;
pub use tunnel::TunnelError;
