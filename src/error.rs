//! Handshake error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the startup handshake.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Empty or malformed `host:port`, caught locally or rejected by the app.
    #[error("invalid address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// Transport-level dial failure, typically the app not listening yet.
    #[error("app at {addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },

    /// Overall handshake deadline exceeded.
    #[error("handshake gave up after {deadline:?}")]
    Timeout { deadline: Duration },

    /// Shutdown was requested while the handshake was still retrying.
    #[error("handshake cancelled by shutdown")]
    Cancelled,

    /// The app rejected the call for a reason other than a bad address.
    #[error("app rejected handshake: {0}")]
    Rejected(tonic::Status),
}

impl ResolveError {
    /// Whether the retry loop may try again after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            ResolveError::Unreachable { .. } => true,
            ResolveError::Rejected(status) => status.code() == tonic::Code::Unavailable,
            _ => false,
        }
    }
}
