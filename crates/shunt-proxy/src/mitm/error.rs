//! Error types for the MITM certificate authority

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaError>;

#[derive(Error, Debug)]
pub enum CaError {
    #[error("CA storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl CaError {
    /// Create a certificate error and log it
    pub fn certificate(msg: impl Into<String>) -> Self {
        let error = CaError::Certificate(msg.into());
        tracing::error!("{}", error);
        error
    }

    /// Create a TLS configuration error and log it
    pub fn tls(msg: impl Into<String>) -> Self {
        let error = CaError::Tls(msg.into());
        tracing::error!("{}", error);
        error
    }
}
