//! Transport boundary.
//!
//! The core never touches sockets directly. A [`Transport`] accepts writes
//! (possibly partial) and can be closed; reads arrive from the event loop via
//! the dispatcher. TLS, if any, lives inside the transport.

use std::io;
use std::sync::Arc;

/// Byte stream the connection core writes to.
pub trait Transport {
    /// Write as much of `buf` as the transport accepts right now.
    ///
    /// A short count or `WouldBlock` means backpressure; any other error is a
    /// transport failure.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Close the stream. Further writes are not attempted.
    fn close(&mut self);

    /// Wrap the stream in server-side TLS.
    fn enable_tls(&mut self, config: Arc<rustls::ServerConfig>) -> io::Result<()> {
        let _ = config;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "transport does not support TLS",
        ))
    }

    /// Last security-layer error, for close diagnostics.
    fn security_error(&self) -> Option<String> {
        None
    }
}

/// Why the event loop is closing a connection.
#[derive(Debug)]
pub enum CloseReason {
    /// Peer closed its side.
    PeerClosed,
    /// Reading from the socket failed.
    ReadError(io::Error),
    /// Writing to the socket failed.
    WriteError(io::Error),
    /// A protocol handler rejected the input.
    ProtocolError,
    /// The worker is shutting down.
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::ReadError(e) => write!(f, "read error: {}", e),
            CloseReason::WriteError(e) => write!(f, "write error: {}", e),
            CloseReason::ProtocolError => write!(f, "protocol error"),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}
