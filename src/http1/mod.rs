//! HTTP/1.1 boundary.
//!
//! # Responsibilities
//! - Hold the single in-flight request of an HTTP/1 connection
//! - Give byte-level handlers ([`Http1Handler`]) a narrow view of the
//!   connection through [`Http1Context`]
//! - Frame HTTP/1.1 responses ([`Http1Responder`])
//!
//! A connection starts here before any protocol is negotiated, so the slot is
//! also what an upgrade to HTTP/2 has to close.

pub mod parser;
pub mod sink;

pub use parser::Http1Parser;
pub use sink::{reason_phrase, Http1Responder};

use std::net::SocketAddr;

use crate::error::Result;
use crate::net::connection::{ConnectionId, ConnectionIo, Flush};
use crate::net::defer::DeferQueue;
use crate::request::{Pipeline, Request, RequestState, RunMode};

/// Parses HTTP/1 bytes and drives requests.
pub trait Http1Handler {
    /// Consume request bytes. Returns how many were used; the rest is offered again
    /// with the next read.
    fn on_read(&mut self, cx: &mut Http1Context<'_>, input: &[u8]) -> Result<usize>;

    /// The send buffer drained.
    fn on_writable(&mut self, cx: &mut Http1Context<'_>);
}

/// Protocol state of an HTTP/1 (or not yet negotiated) connection.
#[derive(Debug, Default)]
pub struct Http1State {
    request: Option<Request>,
    response_done: bool,
    keep_alive: bool,
    body_remaining: u64,
}

impl Http1State {
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// No request has started on this connection yet, or the last one finished.
    pub fn is_idle(&self) -> bool {
        self.request.is_none() && self.body_remaining == 0
    }

    /// Close the in-flight request, if any.
    fn close_request(&mut self, pipeline: &mut dyn Pipeline) {
        if let Some(mut req) = self.request.take() {
            req.state = RequestState::Closed;
            pipeline.close(&mut req);
        }
        self.response_done = false;
    }

    /// Close the in-flight request and forget any unread body.
    pub(crate) fn teardown(&mut self, pipeline: &mut dyn Pipeline) {
        self.close_request(pipeline);
        self.keep_alive = false;
        self.body_remaining = 0;
    }
}

/// What an [`Http1Handler`] may do with its connection.
pub struct Http1Context<'a> {
    io: &'a mut ConnectionIo,
    state: &'a mut Http1State,
    defer: &'a mut DeferQueue,
    pipeline: &'a mut dyn Pipeline,
    upgrade: bool,
}

impl<'a> Http1Context<'a> {
    pub(crate) fn new(
        io: &'a mut ConnectionIo,
        state: &'a mut Http1State,
        defer: &'a mut DeferQueue,
        pipeline: &'a mut dyn Pipeline,
    ) -> Self {
        Self {
            io,
            state,
            defer,
            pipeline,
            upgrade: false,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.io.id()
    }

    pub fn peer(&self) -> SocketAddr {
        self.io.peer()
    }

    pub fn is_closed(&self) -> bool {
        self.io.is_closed()
    }

    pub fn request(&self) -> Option<&Request> {
        self.state.request.as_ref()
    }

    pub fn request_mut(&mut self) -> Option<&mut Request> {
        self.state.request.as_mut()
    }

    /// The in-flight request, created through the pipeline if there is none.
    pub fn start_request(&mut self) -> &mut Request {
        let connection = self.io.id();
        let pipeline = &mut *self.pipeline;
        let state = &mut *self.state;
        if state.request.is_none() {
            state.response_done = false;
        }
        state
            .request
            .get_or_insert_with(|| pipeline.request_new(connection))
    }

    /// Run the pipeline for the in-flight request. Returns false if there is none.
    pub fn run_request(&mut self, mode: RunMode) -> bool {
        let Some(req) = self.state.request.as_mut() else {
            return false;
        };
        let mut sink = Http1Responder::new(
            &mut *self.io,
            &mut *self.defer,
            &mut self.state.response_done,
            req.response.content_length.is_none(),
        );
        self.pipeline.run(req, &mut sink, mode);
        true
    }

    /// The pipeline has written the whole response.
    pub fn response_done(&self) -> bool {
        self.state.response_done
    }

    /// Close the in-flight request and make room for the next one.
    pub fn finish_request(&mut self) {
        self.state.close_request(&mut *self.pipeline);
    }

    /// Whether the connection stays open after the current response.
    pub fn keep_alive(&self) -> bool {
        self.state.keep_alive
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.state.keep_alive = keep_alive;
    }

    /// Request body bytes still to be skipped.
    pub fn body_remaining(&self) -> u64 {
        self.state.body_remaining
    }

    pub fn set_body_remaining(&mut self, n: u64) {
        self.state.body_remaining = n;
    }

    /// Buffer raw bytes. Returns false when there is no room yet.
    pub fn write(&mut self, bytes: &[u8]) -> Result<bool> {
        self.io.append(bytes, self.defer)
    }

    pub fn flush(&mut self) -> Result<Flush> {
        self.io.flush()
    }

    /// Switch the connection to HTTP/2 once this handler call returns.
    pub fn upgrade_to_http2(&mut self) {
        self.upgrade = true;
    }

    pub(crate) fn upgrade_requested(&self) -> bool {
        self.upgrade
    }

    /// Close the connection. The request is closed once the handler returns.
    pub fn close(&mut self) {
        self.io.close(self.defer);
    }
}
