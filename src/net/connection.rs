//! Connection state and lifecycle.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Own the send buffer, transport and both idle timers
//! - Flush with partial-write compaction and send-timer backpressure
//! - Close exactly once, leaving the free to the deferred pass
//!
//! A [`Connection`] is split in two: [`ConnectionIo`] holds everything the
//! protocols write through, [`Protocol`] holds the per-protocol state. Protocol
//! callbacks borrow the I/O half while the protocol half is busy, so a close
//! requested from inside a callback can only touch the I/O half; the protocol
//! teardown runs once the callback has unwound, and only then is the
//! transport shut down.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::http1::Http1State;
use crate::http2::Http2State;
use crate::net::buffer::SendBuffer;
use crate::net::defer::DeferQueue;
use crate::net::listener::Listen;
use crate::net::timer::Timer;
use crate::net::transport::Transport;
use crate::request::Pipeline;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outcome of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Everything buffered reached the transport.
    Done,
    /// The transport took only part; the rest waits for writability.
    Again,
}

/// Outcome of a space request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    /// This many bytes are free at the cursor.
    Ready(usize),
    /// A flush could not free enough room; retry on writability.
    Blocked,
}

/// The I/O half of a connection.
pub struct ConnectionIo {
    id: ConnectionId,
    peer: SocketAddr,
    listen: Arc<Listen>,
    transport: Box<dyn Transport>,
    buffer: SendBuffer,
    recv_timer: Timer,
    send_timer: Timer,
    last_recv: Instant,
    closed: bool,
    shut_down: bool,
    deferred: bool,
}

impl ConnectionIo {
    pub fn new(
        id: ConnectionId,
        listen: Arc<Listen>,
        transport: Box<dyn Transport>,
        peer: SocketAddr,
    ) -> Self {
        let buffer = SendBuffer::new(listen.config.network.send_buffer_size);
        Self {
            id,
            peer,
            listen,
            transport,
            buffer,
            recv_timer: Timer::new(),
            send_timer: Timer::new(),
            last_recv: Instant::now(),
            closed: false,
            shut_down: false,
            deferred: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn listen(&self) -> &Arc<Listen> {
        &self.listen
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The transport has been closed and the buffer released.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// True while queued for the end-of-turn pass.
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn buffer(&self) -> &SendBuffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut SendBuffer {
        &mut self.buffer
    }

    /// Bytes buffered but not yet written.
    pub fn buffered(&self) -> &[u8] {
        self.buffer.pending()
    }

    pub fn recv_timer(&self) -> &Timer {
        &self.recv_timer
    }

    pub fn send_timer(&self) -> &Timer {
        &self.send_timer
    }

    pub(crate) fn recv_timer_mut(&mut self) -> &mut Timer {
        &mut self.recv_timer
    }

    pub(crate) fn send_timer_mut(&mut self) -> &mut Timer {
        &mut self.send_timer
    }

    pub fn last_recv(&self) -> Instant {
        self.last_recv
    }

    /// A short write is outstanding.
    pub fn write_blocked(&self) -> bool {
        self.send_timer.is_armed()
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Record inbound activity and push the idle deadline out.
    pub(crate) fn touch(&mut self) {
        self.last_recv = Instant::now();
        let timeout = self.listen.config.network.recv_timeout();
        self.recv_timer.set_after(timeout);
    }

    /// Queue for the end-of-turn pass (idempotent).
    pub fn defer(&mut self, queue: &mut DeferQueue) {
        queue.schedule(self.id, &mut self.deferred);
    }

    pub(crate) fn clear_deferred(&mut self) {
        self.deferred = false;
    }

    /// Grow capacity by one frame header once a framed protocol is active.
    pub(crate) fn set_frame_slack(&mut self, slack: usize) {
        self.buffer.set_slack(slack);
    }

    /// Write buffered bytes to the transport.
    pub fn flush(&mut self) -> Result<Flush> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.buffer.is_empty() {
            return Ok(Flush::Done);
        }

        let pending = self.buffer.len();
        let written = match self.transport.write(self.buffer.pending()) {
            Ok(n) => n.min(pending),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.id,
                    peer = %self.peer,
                    error = %e,
                    "Write to transport failed"
                );
                return Err(Error::Transport(e));
            }
        };

        if written < pending {
            self.buffer.consume(written);
            let timeout = self.listen.config.network.send_timeout();
            self.send_timer.set_after(timeout);
            tracing::trace!(
                connection_id = %self.id,
                written,
                remaining = pending - written,
                "Short write"
            );
            return Ok(Flush::Again);
        }

        self.send_timer.suspend();
        self.buffer.clear();
        Ok(Flush::Done)
    }

    /// Make sure `size` bytes can be written at the cursor.
    ///
    /// Always queues the connection so buffered bytes go out by the end of the
    /// turn even without an explicit flush.
    pub fn make_space(&mut self, size: usize, defer: &mut DeferQueue) -> Result<Space> {
        if self.closed {
            return Err(Error::Closed);
        }

        let capacity = self.buffer.capacity();
        if size > capacity {
            tracing::error!(
                connection_id = %self.id,
                requested = size,
                capacity,
                "Send buffer too small"
            );
            return Err(Error::BufferTooSmall {
                requested: size,
                capacity,
            });
        }

        self.defer(defer);

        if !self.buffer.is_allocated() {
            self.buffer.allocate()?;
            return Ok(Space::Ready(self.buffer.available()));
        }

        if self.buffer.available() >= size {
            return Ok(Space::Ready(self.buffer.available()));
        }

        self.flush()?;

        let available = self.buffer.available();
        if available >= size {
            Ok(Space::Ready(available))
        } else {
            Ok(Space::Blocked)
        }
    }

    /// Copy raw bytes into the buffer. Returns false when there is no room.
    pub fn append(&mut self, bytes: &[u8], defer: &mut DeferQueue) -> Result<bool> {
        match self.make_space(bytes.len(), defer)? {
            Space::Ready(_) => Ok(self.buffer.extend(bytes)),
            Space::Blocked => Ok(false),
        }
    }

    /// Close from inside a protocol callback: mark and queue only.
    ///
    /// The protocol teardown and the transport shutdown run once the callback
    /// has returned (see [`Connection::settle`]). Returns true on the first call.
    pub fn close(&mut self, defer: &mut DeferQueue) -> bool {
        if !self.mark_closed() {
            return false;
        }
        self.defer(defer);
        true
    }

    pub(crate) fn mark_closed(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        true
    }

    /// Buffer a final frame produced by the protocol teardown (e.g. GOAWAY).
    /// It goes out with the last write in [`shutdown`](Self::shutdown).
    pub(crate) fn append_closing(&mut self, bytes: &[u8]) -> bool {
        if self.shut_down {
            return false;
        }
        if !self.buffer.is_allocated() && self.buffer.allocate().is_err() {
            return false;
        }
        self.buffer.extend(bytes)
    }

    /// Transport-level close steps, run after the protocol teardown. Runs once.
    pub(crate) fn shutdown(&mut self, defer: &mut DeferQueue) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if !self.buffer.is_empty() {
            // best effort, result ignored
            let _ = self.transport.write(self.buffer.pending());
        }
        self.buffer.release();
        self.transport.close();

        self.recv_timer.suspend();
        self.send_timer.suspend();

        self.defer(defer);

        tracing::info!(
            connection_id = %self.id,
            peer = %self.peer,
            "Connection closed"
        );
    }
}

impl std::fmt::Debug for ConnectionIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionIo")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("buffered", &self.buffer.len())
            .field("closed", &self.closed)
            .field("deferred", &self.deferred)
            .finish()
    }
}

/// Per-protocol connection state. Exactly one variant is live.
pub enum Protocol {
    /// Not negotiated, or negotiated to HTTP/1.1.
    Http1(Http1State),
    /// HTTP/2 session and its streams.
    Http2(Http2State),
}

impl Protocol {
    pub fn is_http2(&self) -> bool {
        matches!(self, Protocol::Http2(_))
    }

    /// Close every request owned by this protocol. Idempotent.
    pub(crate) fn teardown(
        &mut self,
        io: &mut ConnectionIo,
        defer: &mut DeferQueue,
        pipeline: &mut dyn Pipeline,
    ) {
        match self {
            Protocol::Http1(h1) => h1.teardown(pipeline),
            Protocol::Http2(h2) => h2.teardown(io, defer, pipeline),
        }
    }
}

/// One accepted transport stream.
pub struct Connection {
    pub(crate) io: ConnectionIo,
    pub(crate) proto: Protocol,
}

impl Connection {
    pub fn new(io: ConnectionIo) -> Self {
        Self {
            io,
            proto: Protocol::Http1(Http1State::default()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.io.id()
    }

    pub fn io(&self) -> &ConnectionIo {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut ConnectionIo {
        &mut self.io
    }

    pub fn protocol(&self) -> &Protocol {
        &self.proto
    }

    pub fn is_http2(&self) -> bool {
        self.proto.is_http2()
    }

    pub fn is_closed(&self) -> bool {
        self.io.is_closed()
    }

    /// Close the connection. The second and later calls do nothing.
    ///
    /// The object stays alive until the deferred pass frees it.
    pub fn close(&mut self, defer: &mut DeferQueue, pipeline: &mut dyn Pipeline) {
        self.io.mark_closed();
        self.settle(defer, pipeline);
    }

    /// Finish a close: protocol teardown first, then one best-effort write and
    /// the transport close. Does nothing for an open or fully closed connection.
    pub(crate) fn settle(&mut self, defer: &mut DeferQueue, pipeline: &mut dyn Pipeline) {
        if !self.io.is_closed() || self.io.is_shut_down() {
            return;
        }
        self.proto.teardown(&mut self.io, defer, pipeline);
        self.io.shutdown(defer);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("io", &self.io)
            .field("http2", &self.is_http2())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenConfig;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Wire {
        written: Vec<u8>,
        quota: Option<usize>,
        closed: bool,
    }

    struct TestTransport(Rc<RefCell<Wire>>);

    impl Transport for TestTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut wire = self.0.borrow_mut();
            let n = match wire.quota.take() {
                Some(q) => q.min(buf.len()),
                None => buf.len(),
            };
            wire.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn close(&mut self) {
            self.0.borrow_mut().closed = true;
        }
    }

    fn io_with(size: usize) -> (ConnectionIo, Rc<RefCell<Wire>>) {
        let mut config = ListenConfig::default();
        config.network.send_buffer_size = size;
        let wire = Rc::new(RefCell::new(Wire::default()));
        let io = ConnectionIo::new(
            ConnectionId::new(),
            Arc::new(Listen::plain(config)),
            Box::new(TestTransport(wire.clone())),
            "127.0.0.1:1000".parse().unwrap(),
        );
        (io, wire)
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn flush_with_nothing_buffered() {
        let (mut io, wire) = io_with(64);
        assert_eq!(io.flush().unwrap(), Flush::Done);
        assert!(wire.borrow().written.is_empty());
    }

    #[test]
    fn make_space_allocates_lazily() {
        let (mut io, _) = io_with(64);
        let mut defer = DeferQueue::new();
        assert!(!io.buffer().is_allocated());
        assert_eq!(io.make_space(10, &mut defer).unwrap(), Space::Ready(64));
        assert!(io.buffer().is_allocated());
        assert!(io.is_deferred());
    }

    #[test]
    fn oversize_request_leaves_state_untouched() {
        let (mut io, _) = io_with(64);
        let mut defer = DeferQueue::new();
        let err = io.make_space(65, &mut defer).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall { requested: 65, capacity: 64 }));
        assert!(!io.buffer().is_allocated());
        assert!(!io.is_deferred());
        assert!(defer.is_empty());
    }

    #[test]
    fn make_space_flushes_when_full() {
        let (mut io, wire) = io_with(32);
        let mut defer = DeferQueue::new();
        assert!(io.append(&[7u8; 30], &mut defer).unwrap());
        assert_eq!(io.make_space(16, &mut defer).unwrap(), Space::Ready(32));
        assert_eq!(wire.borrow().written.len(), 30);
    }

    #[test]
    fn make_space_blocked_when_flush_is_short() {
        let (mut io, wire) = io_with(32);
        let mut defer = DeferQueue::new();
        io.append(&[1u8; 30], &mut defer).unwrap();
        wire.borrow_mut().quota = Some(4);
        assert_eq!(io.make_space(16, &mut defer).unwrap(), Space::Blocked);
        assert_eq!(io.buffered().len(), 26);
        assert!(io.write_blocked());
    }

    #[test]
    fn transport_error_does_not_close() {
        struct Broken;
        impl Transport for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken"))
            }
            fn close(&mut self) {}
        }

        let mut io = ConnectionIo::new(
            ConnectionId::new(),
            Arc::new(Listen::plain(ListenConfig::default())),
            Box::new(Broken),
            "127.0.0.1:1000".parse().unwrap(),
        );
        let mut defer = DeferQueue::new();
        io.append(b"abc", &mut defer).unwrap();
        assert!(matches!(io.flush(), Err(Error::Transport(_))));
        assert!(!io.is_closed());
    }

    #[test]
    fn callback_close_only_marks() {
        let (mut io, wire) = io_with(64);
        let mut defer = DeferQueue::new();
        io.append(b"bye", &mut defer).unwrap();

        assert!(io.close(&mut defer));
        assert!(!io.close(&mut defer));

        assert!(io.is_closed());
        assert!(!io.is_shut_down());
        assert!(wire.borrow().written.is_empty());
        assert!(!wire.borrow().closed);
        assert_eq!(defer.len(), 1);
        assert!(matches!(io.flush(), Err(Error::Closed)));
        assert!(matches!(io.make_space(1, &mut defer), Err(Error::Closed)));
    }

    #[test]
    fn shutdown_writes_once_and_releases() {
        let (mut io, wire) = io_with(64);
        let mut defer = DeferQueue::new();
        io.append(b"bye", &mut defer).unwrap();
        io.close(&mut defer);

        assert!(io.append_closing(b"!"));
        io.shutdown(&mut defer);
        io.shutdown(&mut defer);

        let wire = wire.borrow();
        assert_eq!(wire.written, b"bye!");
        assert!(wire.closed);
        assert!(io.is_shut_down());
        assert!(!io.buffer().is_allocated());
        assert_eq!(defer.len(), 1);
        assert!(!io.append_closing(b"late"));
    }

    #[test]
    fn closing_frame_allocates_released_buffer() {
        let (mut io, wire) = io_with(64);
        let mut defer = DeferQueue::new();
        io.close(&mut defer);
        assert!(!io.buffer().is_allocated());

        assert!(io.append_closing(b"GOAWAY"));
        io.shutdown(&mut defer);
        assert_eq!(wire.borrow().written, b"GOAWAY");
    }
}
