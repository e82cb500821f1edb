//! Configuration types for the Shunt proxy.

mod listen;
mod mock_server;
mod upstream;

use std::path::Path;

use hyper::Method;
use serde::{Deserialize, Serialize};

use crate::mocks::{ActiveMock, MockRegistry};

pub use listen::{ListenConfig, MetricsConfig, DEFAULT_MAX_REQUEST_BUFFER_BYTES};
pub use mock_server::{MitmConfig, MockServerConfig};
pub use upstream::UpstreamConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub mock_server: MockServerConfig,
    #[serde(default)]
    pub mitm: MitmConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Methods that are never substituted, whatever the configured mocks say
    #[serde(default = "default_excluded_methods")]
    pub excluded_methods: Vec<String>,

    #[serde(default)]
    pub live_log: LiveLogConfig,

    /// Active mock snapshot loaded at startup
    #[serde(default)]
    pub mocks: Vec<ActiveMock>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            metrics: MetricsConfig::default(),
            mock_server: MockServerConfig::default(),
            mitm: MitmConfig::default(),
            upstream: UpstreamConfig::default(),
            excluded_methods: default_excluded_methods(),
            live_log: LiveLogConfig::default(),
            mocks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiveLogConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Bodies longer than this are truncated in live-log events
    #[serde(default = "default_log_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for LiveLogConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            max_body_bytes: default_log_body_bytes(),
        }
    }
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_log_body_bytes() -> usize {
    64 * 1024
}

fn default_excluded_methods() -> Vec<String> {
    ["HEAD", "OPTIONS", "TRACE", "CONNECT"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, anyhow::Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.listen.max_request_buffer_bytes == 0 {
            anyhow::bail!("listen.max_request_buffer_bytes must be greater than zero");
        }

        // A call-out without a deadline could hold a connection forever
        if self.mock_server.timeout_ms == 0 {
            anyhow::bail!("mock_server.timeout_ms must be greater than zero");
        }
        if self.mock_server.max_in_flight == 0 {
            anyhow::bail!("mock_server.max_in_flight must be greater than zero");
        }

        self.excluded_method_set()?;

        MockRegistry::new(self.mocks.clone())
            .map_err(|e| anyhow::anyhow!("Invalid mock configuration: {e}"))?;

        Ok(())
    }

    /// Parse `excluded_methods` into hyper methods.
    pub fn excluded_method_set(&self) -> Result<Vec<Method>, anyhow::Error> {
        self.excluded_methods
            .iter()
            .map(|m| {
                m.to_ascii_uppercase()
                    .parse::<Method>()
                    .map_err(|e| anyhow::anyhow!("Invalid excluded method '{m}': {e}"))
            })
            .collect()
    }
}
