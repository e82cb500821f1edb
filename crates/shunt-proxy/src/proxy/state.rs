//! Running flag and bound port of a proxy engine.

use serde::Serialize;

/// Snapshot of the engine lifecycle, always read and written under one lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerState {
    pub running: bool,
    pub port: u16,
}

impl ServerState {
    pub fn running(port: u16) -> Self {
        Self {
            running: true,
            port,
        }
    }

    pub fn stopped() -> Self {
        Self::default()
    }
}
