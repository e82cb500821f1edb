//! Live-log events and the fire-and-forget publisher.
//!
//! Every intercepted request produces one inbound event and at most one
//! outbound event. Events go to an in-process broadcast channel and to any
//! registered sinks. Failures on the delivery side never reach the proxy.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// A structured event describing one side of an intercepted exchange.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveLogEvent {
    pub request_id: String,
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub success: bool,
    pub via_mock: bool,
    pub timestamp: DateTime<Utc>,
}

impl LiveLogEvent {
    pub fn inbound(
        request_id: impl Into<String>,
        method: impl Into<String>,
        uri: impl Into<String>,
        content_type: Option<String>,
        body: Option<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            direction: Direction::In,
            method: Some(method.into()),
            status: None,
            uri: Some(uri.into()),
            content_type,
            body,
            success: true,
            via_mock: false,
            timestamp: Utc::now(),
        }
    }

    pub fn outbound(
        request_id: impl Into<String>,
        status: Option<u16>,
        content_type: Option<String>,
        body: Option<String>,
        success: bool,
        via_mock: bool,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            direction: Direction::Out,
            method: None,
            status,
            uri: None,
            content_type,
            body,
            success,
            via_mock,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
#[error("live log sink failed: {0}")]
pub struct SinkError(pub String);

/// A subscriber receiving every published event synchronously.
///
/// `deliver` runs inline on the request path, so implementations must return
/// promptly and never block. Sinks doing I/O should hand events off to their
/// own task (for example through a channel) instead of writing in place.
/// A panicking sink is logged and skipped.
pub trait LiveLogSink: Send + Sync {
    fn deliver(&self, event: &LiveLogEvent) -> Result<(), SinkError>;
}

/// Sink mirroring events into the tracing log as JSON.
pub struct TracingSink;

impl LiveLogSink for TracingSink {
    fn deliver(&self, event: &LiveLogEvent) -> Result<(), SinkError> {
        let json = serde_json::to_string(event).map_err(|e| SinkError(e.to_string()))?;
        info!(target: "shunt::live_log", "{}", json);
        Ok(())
    }
}

/// Broadcasts live-log events. Cloning shares the same channel and sinks.
#[derive(Clone)]
pub struct LiveLogPublisher {
    tx: broadcast::Sender<LiveLogEvent>,
    sinks: Arc<RwLock<Vec<Arc<dyn LiveLogSink>>>>,
    max_body_bytes: usize,
}

impl LiveLogPublisher {
    pub fn new(channel_capacity: usize, max_body_bytes: usize) -> Self {
        let (tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            tx,
            sinks: Arc::new(RwLock::new(Vec::new())),
            max_body_bytes,
        }
    }

    /// Receive all events published from now on. Slow receivers lag and lose events.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveLogEvent> {
        self.tx.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn LiveLogSink>) {
        self.sinks.write().push(sink);
    }

    /// Largest body carried by an event; longer bodies are truncated.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Publish an event. Never fails: missing receivers and sink errors are swallowed.
    pub fn publish(&self, mut event: LiveLogEvent) {
        if let Some(ref mut body) = event.body {
            truncate_at_char_boundary(body, self.max_body_bytes);
        }

        let sinks = self.sinks.read().clone();
        for sink in sinks {
            match panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(
                    "Dropping live log event {} for failed sink: {}",
                    event.request_id, e
                ),
                Err(_) => warn!("Live log sink panicked on event {}", event.request_id),
            }
        }

        // Err only means nobody is listening right now
        let _ = self.tx.send(event);
    }
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
