//! Crate-wide error type.
//!
//! Every failure funnels into connection close at the call site that owns the
//! connection; nothing here retries. Partial writes are not errors, they surface
//! as [`Flush::Again`](crate::net::connection::Flush::Again).

use std::io;

/// Errors produced by the connection core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A space request exceeded the configured send buffer capacity.
    /// This is a sizing defect, never retried.
    #[error("requested {requested} bytes but send buffer capacity is {capacity}")]
    BufferTooSmall { requested: usize, capacity: usize },

    /// The connection was already closed.
    #[error("connection closed")]
    Closed,

    /// Read or write failure on the underlying transport.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Malformed input reported by a protocol handler.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection state or buffer could not be allocated.
    #[error("allocation failed")]
    Allocation,
}

impl Error {
    /// Build a protocol error from anything printable.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
