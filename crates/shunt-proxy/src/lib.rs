//! Shunt: an intercepting HTTP(S) proxy that substitutes matched requests
//! with responses from a mock-serving component.
//!
//! - `proxy`: the engine (lifecycle, connections, CONNECT/MITM, forwarding)
//! - `intercept`: request and response phases around every request
//! - `mocks`: active mock registry and matcher
//! - `invoker`: call-out to the mock-serving component
//! - `live_log`: structured events for live observers
//! - `mitm`: root CA and per-host certificates

pub mod config;
pub mod intercept;
pub mod invoker;
pub mod live_log;
pub mod metrics;
pub mod mitm;
pub mod mocks;
pub mod proxy;

pub use config::Config;
pub use live_log::{Direction, LiveLogEvent, LiveLogPublisher, LiveLogSink, TracingSink};
pub use mocks::{ActiveMock, MatchRule};
pub use proxy::{ProxyEngine, ProxyError, ServerState, StartupError};
