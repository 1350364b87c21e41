//! Boundary to the HTTP/2 framing library.
//!
//! A [`Session`] parses inbound frames, tracks streams and schedules output.
//! It reports everything through [`StreamHooks`], which the adapter passes in on
//! every call; a session keeps no reference to the connection between calls.

use std::time::Duration;

use crate::config::Http2Config;
use crate::error::Result;
use crate::net::connection::ConnectionId;

/// HTTP/2 stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One decoded header field. `None` marks the end of a header block.
pub type HeaderField<'a> = Option<(&'a [u8], &'a [u8])>;

/// Callbacks a session makes into the connection.
///
/// Returning `false` from a stream hook asks the session to reset that stream.
pub trait StreamHooks {
    fn stream_header(&mut self, stream: StreamId, field: HeaderField<'_>) -> bool;

    fn stream_body(&mut self, stream: StreamId, data: &[u8]) -> bool;

    /// The stream is gone. The session never mentions it again.
    fn stream_close(&mut self, stream: StreamId);

    /// The stream may send up to `window` more bytes.
    fn stream_response(&mut self, stream: StreamId, window: i32) -> bool;

    /// Connection-level bytes (SETTINGS, WINDOW_UPDATE, PING, GOAWAY), already framed.
    fn control_frame(&mut self, frame: &[u8]) -> bool;
}

/// A server-side HTTP/2 connection inside the framing library.
pub trait Session {
    /// Consume inbound bytes. Returns how many were used.
    fn process_input(&mut self, input: &[u8], hooks: &mut dyn StreamHooks) -> Result<usize>;

    /// Give streams with pending output a chance to write.
    fn schedule(&mut self, hooks: &mut dyn StreamHooks);

    /// The connection went idle. Returns how much longer to wait, zero to give up.
    /// May send a PING through [`StreamHooks::control_frame`].
    fn idle_ping(&mut self, hooks: &mut dyn StreamHooks) -> Duration;

    /// Tear down the session, closing every open stream through the hooks.
    fn close(&mut self, hooks: &mut dyn StreamHooks);
}

/// Creates a session when a connection switches to HTTP/2.
pub trait SessionFactory {
    fn new_session(&mut self, connection: ConnectionId, settings: &Http2Config) -> Box<dyn Session>;
}
