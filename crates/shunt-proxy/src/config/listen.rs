//! Listener and metrics configuration.

use serde::{Deserialize, Serialize};

/// Largest request body buffered by the proxy before the request is rejected.
pub const DEFAULT_MAX_REQUEST_BUFFER_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_port")]
    pub port: u16,
    #[serde(default = "default_listen_host")]
    pub host: String,
    /// Number of worker threads (0 = auto-detect CPU count)
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_max_request_buffer_bytes")]
    pub max_request_buffer_bytes: usize,
}

impl ListenConfig {
    /// Worker threads for the runtime, resolving 0 to the CPU count.
    pub fn worker_threads(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            host: default_listen_host(),
            workers: 0,
            max_request_buffer_bytes: default_max_request_buffer_bytes(),
        }
    }
}

fn default_listen_port() -> u16 {
    8080
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_request_buffer_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BUFFER_BYTES
}

/// Prometheus endpoint, served on its own port next to the proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Port for `GET /metrics` (0 picks a free port), bound on `listen.host`
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}
