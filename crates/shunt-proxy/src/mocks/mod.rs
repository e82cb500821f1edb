//! Active mock registry and matching.
//!
//! - `types`: `ActiveMock` and `MatchRule` as supplied by the caller
//! - `registry`: compiled, immutable snapshot used for the life of a proxy instance
//! - `matcher`: pure lookup of the mock covering a request

mod matcher;
mod registry;
mod types;

pub use matcher::{find_match, MatchError};
pub use registry::{CompiledMock, MockRegistry, RegistryError};
pub use types::{ActiveMock, MatchRule};
