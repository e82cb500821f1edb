//! Mock-serving component and MITM certificate configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where the mock-serving component lives and how it is called.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MockServerConfig {
    #[serde(default = "default_mock_host")]
    pub host: String,
    #[serde(default = "default_mock_port")]
    pub port: u16,
    /// Timeout for a single call to the mock-serving component
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum concurrent calls to the mock-serving component
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Add `x-shunt-mocked: true` to substituted responses
    #[serde(default)]
    pub mark_mocked_responses: bool,
}

impl MockServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            host: default_mock_host(),
            port: default_mock_port(),
            timeout_ms: default_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            mark_mocked_responses: false,
        }
    }
}

fn default_mock_host() -> String {
    "127.0.0.1".to_string()
}

fn default_mock_port() -> u16 {
    8001
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_in_flight() -> usize {
    64
}

/// Storage and caching of the MITM certificate authority.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MitmConfig {
    #[serde(default = "default_ca_storage_path")]
    pub ca_storage_path: PathBuf,
    #[serde(default = "default_cert_cache_capacity")]
    pub cert_cache_capacity: u64,
}

impl Default for MitmConfig {
    fn default() -> Self {
        Self {
            ca_storage_path: default_ca_storage_path(),
            cert_cache_capacity: default_cert_cache_capacity(),
        }
    }
}

fn default_ca_storage_path() -> PathBuf {
    PathBuf::from(".shunt-ca")
}

fn default_cert_cache_capacity() -> u64 {
    1000
}
