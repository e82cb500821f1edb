//! TLS man-in-the-middle support.
//!
//! - `ca`: root CA persistence and per-host leaf certificates
//! - `error`: error type shared by both

mod ca;
mod error;

pub use ca::{CertificateAuthority, CertificateManager};
pub use error::{CaError, Result};
