//! The two-phase interception pipeline.
//!
//! - `context`: per-request state and its resolution state machine
//! - `request_phase`: runs once per request, decides if it may be mocked
//! - `response_phase`: runs per response chunk, performs the substitution

mod context;
mod request_phase;
mod response_phase;

pub use context::{LoggingState, MockedResponse, Outcome, RequestContext, Resolution};
pub use request_phase::{InboundRequest, RequestPhase, RequestVerdict};
pub use response_phase::{ChunkVerdict, ResponseChunk, ResponsePhase};
