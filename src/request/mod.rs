//! Request state and the content pipeline boundary.
//!
//! # Responsibilities
//! - Hold what the protocol layers parsed for one request
//! - Hold the response the pipeline stages (status, length, headers)
//! - Define how the pipeline is driven ([`Pipeline`]) and how it writes ([`ResponseSink`])
//!
//! # Design Decisions
//! - A request is owned by exactly one slot: the HTTP/1 request slot or the
//!   HTTP/2 stream map. Dropping it out of that slot is the only way it dies,
//!   and every such path calls [`Pipeline::close`] first
//! - The sink is passed per call, so a pipeline never holds on to connection state

pub mod header;
pub mod method;

pub use header::{Header, HeaderList};
pub use method::Method;

use crate::error::Result;
use crate::http2::StreamId;
use crate::net::buffer::Reservation;
use crate::net::connection::{ConnectionId, Flush};

/// Where a request is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    ReceivingHeaders,
    ProcessingHeaders,
    Responding,
    Closed,
}

/// Why the pipeline is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Headers are complete; start producing the response.
    Start,
    /// The connection can take more output; continue.
    Resume,
}

/// Response side staged by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    /// `None` when the length is not known up front.
    pub content_length: Option<u64>,
    pub headers: HeaderList,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            content_length: None,
            headers: HeaderList::new(),
        }
    }
}

/// One request on a connection.
#[derive(Debug, Clone)]
pub struct Request {
    pub connection: ConnectionId,
    /// Bound stream on HTTP/2, `None` on HTTP/1.
    pub stream: Option<StreamId>,
    pub state: RequestState,
    pub method: Option<Method>,
    pub url: String,
    pub host: Option<String>,
    pub headers: HeaderList,
    pub response: Response,
}

impl Request {
    pub fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            stream: None,
            state: RequestState::ReceivingHeaders,
            method: None,
            url: String::new(),
            host: None,
            headers: HeaderList::new(),
            response: Response::default(),
        }
    }
}

/// The content-generation pipeline.
pub trait Pipeline {
    /// Create a request for a new HTTP/2 stream or HTTP/1 exchange.
    fn request_new(&mut self, connection: ConnectionId) -> Request {
        Request::new(connection)
    }

    /// Produce (or continue producing) the response for `req`.
    fn run(&mut self, req: &mut Request, sink: &mut dyn ResponseSink, mode: RunMode);

    /// Release whatever the pipeline holds for `req`. Called exactly once per request.
    fn close(&mut self, req: &mut Request);
}

/// Protocol-specific response framing.
///
/// Body output is two-phase: [`reserve_body`](Self::reserve_body) sets aside a
/// frame header ahead of a payload region, the pipeline fills the region in
/// place through [`body_mut`](Self::body_mut), and
/// [`commit_body`](Self::commit_body) backfills the header.
pub trait ResponseSink {
    fn connection_id(&self) -> ConnectionId;

    /// Frame the staged response headers and move `req` to `Responding`.
    /// `Flush::Again` means no room yet; retry on resume.
    fn response_headers(&mut self, req: &mut Request) -> Result<Flush>;

    /// Reserve room for up to `want` payload bytes. `None` means no room yet.
    fn reserve_body(&mut self, want: usize) -> Result<Option<Reservation>>;

    fn body_mut(&mut self, reservation: &Reservation) -> &mut [u8];

    /// Finish a body frame of `len` payload bytes. Returns bytes added to the buffer.
    fn commit_body(&mut self, reservation: Reservation, len: usize, finished: bool) -> usize;

    fn abandon_body(&mut self, reservation: Reservation);

    /// Copy as much of `data` as fits into one body frame.
    /// Returns the number of `data` bytes taken, or `None` when blocked.
    fn send_body(&mut self, data: &[u8], finished: bool) -> Result<Option<usize>> {
        let Some(reservation) = self.reserve_body(data.len())? else {
            return Ok(None);
        };
        let n = data.len().min(reservation.payload_capacity());
        if n == 0 && !data.is_empty() {
            self.abandon_body(reservation);
            return Ok(None);
        }
        self.body_mut(&reservation)[..n].copy_from_slice(&data[..n]);
        self.commit_body(reservation, n, finished && n == data.len());
        Ok(Some(n))
    }

    /// Close the whole connection from inside the pipeline.
    fn close_connection(&mut self);
}
