//! HTTP/2 adapter: session hooks, request binding and response framing.
//!
//! # Data Flow
//! ```text
//! on_read(bytes)
//!     → Session::process_input
//!         → stream_header*  (request created on first header, fields applied)
//!         → stream_header(None)  → Pipeline::run(Start)
//!         → stream_close    → Pipeline::close, request unbound
//!     → Session::schedule (unless write-blocked)
//!         → stream_response → Pipeline::run(Resume)
//!             → Http2Responder → HEADERS / DATA frames in the send buffer
//! ```
//!
//! # Design Decisions
//! - Hooks borrow the connection I/O, the stream map and the encoder for the
//!   duration of one session call only
//! - Request bodies are accepted and dropped
//! - Response payloads are written in place; the frame header is backfilled

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::http2::frame::{
    self, FLAG_END_HEADERS, FLAG_END_STREAM, FRAME_DATA, FRAME_HEADERS, FRAME_HEADER_SIZE,
    MAX_FRAME_SIZE,
};
use crate::http2::hpack::HeaderEncoder;
use crate::http2::session::{HeaderField, Session, SessionFactory, StreamHooks, StreamId};
use crate::net::buffer::Reservation;
use crate::net::connection::{Connection, ConnectionId, ConnectionIo, Flush, Protocol, Space};
use crate::net::defer::DeferQueue;
use crate::request::{Method, Pipeline, Request, RequestState, ResponseSink, RunMode};

/// Extra room requested on top of the staged response headers.
pub const HEADERS_HEADROOM: usize = 100;

/// Protocol state of a connection running HTTP/2.
pub struct Http2State {
    session: Box<dyn Session>,
    streams: HashMap<StreamId, Request>,
    encoder: HeaderEncoder,
    torn_down: bool,
}

impl Http2State {
    pub fn new(session: Box<dyn Session>) -> Self {
        Self {
            session,
            streams: HashMap::new(),
            encoder: HeaderEncoder::new(),
            torn_down: false,
        }
    }

    /// Streams that currently own a request.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn request(&self, stream: StreamId) -> Option<&Request> {
        self.streams.get(&stream)
    }

    /// Feed inbound bytes to the session, then let it schedule output.
    pub(crate) fn on_read(
        &mut self,
        io: &mut ConnectionIo,
        defer: &mut DeferQueue,
        pipeline: &mut dyn Pipeline,
        input: &[u8],
    ) -> Result<usize> {
        let Http2State {
            session,
            streams,
            encoder,
            ..
        } = self;
        let mut hooks = Hooks {
            io,
            streams,
            encoder,
            defer,
            pipeline,
        };

        let consumed = session.process_input(input, &mut hooks).map_err(|e| match e {
            Error::Protocol(_) => e,
            other => Error::protocol(other.to_string()),
        })?;

        if !hooks.io.is_closed() && !hooks.io.write_blocked() {
            session.schedule(&mut hooks);
        }
        Ok(consumed)
    }

    /// The send buffer drained; let blocked streams continue.
    pub(crate) fn on_writable(
        &mut self,
        io: &mut ConnectionIo,
        defer: &mut DeferQueue,
        pipeline: &mut dyn Pipeline,
    ) {
        let Http2State {
            session,
            streams,
            encoder,
            ..
        } = self;
        let mut hooks = Hooks {
            io,
            streams,
            encoder,
            defer,
            pipeline,
        };
        session.schedule(&mut hooks);
    }

    /// Ask the session how long to keep an idle connection.
    pub(crate) fn idle_ping(
        &mut self,
        io: &mut ConnectionIo,
        defer: &mut DeferQueue,
        pipeline: &mut dyn Pipeline,
    ) -> Duration {
        let Http2State {
            session,
            streams,
            encoder,
            ..
        } = self;
        let mut hooks = Hooks {
            io,
            streams,
            encoder,
            defer,
            pipeline,
        };
        session.idle_ping(&mut hooks)
    }

    /// Close the session and every request still bound to a stream. Runs once.
    pub(crate) fn teardown(
        &mut self,
        io: &mut ConnectionIo,
        defer: &mut DeferQueue,
        pipeline: &mut dyn Pipeline,
    ) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        {
            let Http2State {
                session,
                streams,
                encoder,
                ..
            } = self;
            let mut hooks = Hooks {
                io,
                streams,
                encoder,
                defer,
                pipeline: &mut *pipeline,
            };
            session.close(&mut hooks);
        }

        for (stream, mut req) in self.streams.drain() {
            tracing::trace!(stream = %stream, "Closing request left after session close");
            req.state = RequestState::Closed;
            pipeline.close(&mut req);
        }
    }
}

/// Switch a connection to HTTP/2. Returns false if it already runs HTTP/2.
pub(crate) fn connection_init(
    conn: &mut Connection,
    sessions: &mut dyn SessionFactory,
    pipeline: &mut dyn Pipeline,
) -> bool {
    if conn.proto.is_http2() {
        return false;
    }

    let settings = conn.io.listen().config.http2.clone();
    let session = sessions.new_session(conn.id(), &settings);

    conn.io.set_frame_slack(FRAME_HEADER_SIZE);
    if let Protocol::Http1(h1) = &mut conn.proto {
        h1.teardown(pipeline);
    }
    conn.proto = Protocol::Http2(Http2State::new(session));

    tracing::info!(
        connection_id = %conn.id(),
        peer = %conn.io.peer(),
        max_concurrent_streams = settings.max_concurrent_streams,
        "Connection switched to HTTP/2"
    );
    true
}

/// Hook implementation handed to the session for one call.
struct Hooks<'a> {
    io: &'a mut ConnectionIo,
    streams: &'a mut HashMap<StreamId, Request>,
    encoder: &'a mut HeaderEncoder,
    defer: &'a mut DeferQueue,
    pipeline: &'a mut dyn Pipeline,
}

impl Hooks<'_> {
    /// Run the pipeline for the request bound to `stream`.
    fn run(&mut self, stream: StreamId, mode: RunMode) -> bool {
        let Hooks {
            io,
            streams,
            encoder,
            defer,
            pipeline,
        } = self;
        let Some(req) = streams.get_mut(&stream) else {
            return false;
        };
        let mut sink = Http2Responder {
            io: &mut **io,
            encoder: &mut **encoder,
            defer: &mut **defer,
            stream,
        };
        pipeline.run(req, &mut sink, mode);
        true
    }
}

impl StreamHooks for Hooks<'_> {
    fn stream_header(&mut self, stream: StreamId, field: HeaderField<'_>) -> bool {
        if self.io.is_closed() {
            return false;
        }

        let connection = self.io.id();
        let pipeline = &mut *self.pipeline;
        let req = self.streams.entry(stream).or_insert_with(|| {
            let mut req = pipeline.request_new(connection);
            req.stream = Some(stream);
            req
        });

        let Some((name, value)) = field else {
            // trailers end with a second marker; the pipeline already runs
            if req.state != RequestState::ReceivingHeaders {
                return true;
            }
            req.state = RequestState::ProcessingHeaders;
            self.run(stream, RunMode::Start);
            return true;
        };

        let accepted = apply_header(req, name, value);
        if !accepted {
            tracing::debug!(
                connection_id = %connection,
                stream = %stream,
                header = %String::from_utf8_lossy(name),
                "Rejected request header"
            );
        }
        accepted
    }

    fn stream_body(&mut self, _stream: StreamId, _data: &[u8]) -> bool {
        true
    }

    fn stream_close(&mut self, stream: StreamId) {
        if let Some(mut req) = self.streams.remove(&stream) {
            req.state = RequestState::Closed;
            self.pipeline.close(&mut req);
        }
    }

    fn stream_response(&mut self, stream: StreamId, _window: i32) -> bool {
        if self.io.is_closed() {
            return false;
        }
        self.run(stream, RunMode::Resume)
    }

    fn control_frame(&mut self, frame: &[u8]) -> bool {
        if self.io.is_closed() {
            // final frames from a close in progress go out with the last write
            return self.io.append_closing(frame);
        }
        match self.io.append(frame, self.defer) {
            Ok(written) => written,
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.io.id(),
                    error = %e,
                    "Control frame dropped"
                );
                false
            }
        }
    }
}

/// Apply one request header field. Returns false to reject the stream.
fn apply_header(req: &mut Request, name: &[u8], value: &[u8]) -> bool {
    if name.first() != Some(&b':') {
        req.headers.push(lossy(name), lossy(value));
        return true;
    }

    match name {
        b":path" => {
            req.url = lossy(value);
            true
        }
        b":authority" => {
            let host = lossy(value);
            req.headers.push("Host", host.clone());
            req.host = Some(host);
            true
        }
        b":scheme" => true,
        b":method" => match Method::from_bytes(value) {
            Some(method) => {
                req.method = Some(method);
                true
            }
            None => false,
        },
        _ => false,
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Frames a stream's response into the connection's send buffer.
pub struct Http2Responder<'a> {
    io: &'a mut ConnectionIo,
    encoder: &'a mut HeaderEncoder,
    defer: &'a mut DeferQueue,
    stream: StreamId,
}

impl Http2Responder<'_> {
    pub fn stream(&self) -> StreamId {
        self.stream
    }
}

impl ResponseSink for Http2Responder<'_> {
    fn connection_id(&self) -> ConnectionId {
        self.io.id()
    }

    fn response_headers(&mut self, req: &mut Request) -> Result<Flush> {
        let block_len = self.encoder.encoded_len(&req.response);
        if block_len > MAX_FRAME_SIZE {
            tracing::warn!(
                connection_id = %self.io.id(),
                stream = %self.stream,
                block_len,
                "Response headers exceed one frame"
            );
            return Err(Error::BufferTooSmall {
                requested: block_len,
                capacity: MAX_FRAME_SIZE,
            });
        }

        let needed = block_len + FRAME_HEADER_SIZE;
        let estimate = req.response.headers.staged_len() + HEADERS_HEADROOM;
        let size = needed.max(estimate.min(self.io.buffer().capacity()));
        if let Space::Blocked = self.io.make_space(size, self.defer)? {
            return Ok(Flush::Again);
        }

        let buffer = self.io.buffer_mut();
        let Some(reservation) = buffer.reserve(FRAME_HEADER_SIZE, 0) else {
            return Ok(Flush::Again);
        };
        let Some(len) = self.encoder.encode(&req.response, buffer.payload_mut(&reservation)) else {
            buffer.abandon(reservation);
            return Ok(Flush::Again);
        };

        let mut flags = FLAG_END_HEADERS;
        if req.response.content_length == Some(0) {
            flags |= FLAG_END_STREAM;
        }
        let stream = self.stream.0;
        buffer.commit(reservation, len, &[], |hdr| {
            frame::write_header(hdr, len, FRAME_HEADERS, flags, stream)
        });

        req.state = RequestState::Responding;
        Ok(Flush::Done)
    }

    fn reserve_body(&mut self, want: usize) -> Result<Option<Reservation>> {
        let capacity = self.io.buffer().capacity();
        let size = (want.min(MAX_FRAME_SIZE) + FRAME_HEADER_SIZE).min(capacity);
        match self.io.make_space(size, self.defer)? {
            Space::Blocked => Ok(None),
            Space::Ready(_) => Ok(self
                .io
                .buffer_mut()
                .reserve(FRAME_HEADER_SIZE, 0)
                .map(|r| r.limit(MAX_FRAME_SIZE))),
        }
    }

    fn body_mut(&mut self, reservation: &Reservation) -> &mut [u8] {
        self.io.buffer_mut().payload_mut(reservation)
    }

    fn commit_body(&mut self, reservation: Reservation, len: usize, finished: bool) -> usize {
        let flags = if finished { FLAG_END_STREAM } else { 0 };
        let stream = self.stream.0;
        self.io.buffer_mut().commit(reservation, len, &[], |hdr| {
            frame::write_header(hdr, len, FRAME_DATA, flags, stream)
        })
    }

    fn abandon_body(&mut self, reservation: Reservation) {
        self.io.buffer_mut().abandon(reservation);
    }

    fn close_connection(&mut self) {
        self.io.close(self.defer);
    }
}
