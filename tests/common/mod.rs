//! Shared mocks for integration tests: a recording transport, a scripted
//! HTTP/2 session and a recording pipeline.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use muxd::config::{Http2Config, ListenConfig};
use muxd::error::{Error, Result};
use muxd::http1::Http1Parser;
use muxd::http2::frame::{FrameHeader, FRAME_HEADER_SIZE};
use muxd::http2::{HeaderField, Session, SessionFactory, StreamHooks, StreamId};
use muxd::net::{ConnectionId, Listen, Transport};
use muxd::request::{HeaderList, Method, Pipeline, Request, ResponseSink, RunMode};
use muxd::worker::{Components, Worker};

pub fn peer() -> SocketAddr {
    "192.0.2.10:40000".parse().unwrap()
}

/// A plaintext listen with the given send buffer size.
pub fn listen(send_buffer_size: usize) -> Arc<Listen> {
    let mut config = ListenConfig::default();
    config.network.send_buffer_size = send_buffer_size;
    Arc::new(Listen::plain(config))
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Wire {
    pub written: Vec<u8>,
    /// Per-call write limits, consumed front to back; unlimited when empty.
    pub quotas: VecDeque<usize>,
    pub fail_with: Option<io::ErrorKind>,
    pub write_calls: usize,
    pub close_calls: usize,
}

impl Wire {
    pub fn is_closed(&self) -> bool {
        self.close_calls > 0
    }
}

pub type SharedWire = Rc<RefCell<Wire>>;

pub struct RecordingTransport {
    wire: SharedWire,
}

impl RecordingTransport {
    pub fn new() -> (Self, SharedWire) {
        let wire = SharedWire::default();
        (Self { wire: wire.clone() }, wire)
    }
}

impl Transport for RecordingTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut wire = self.wire.borrow_mut();
        wire.write_calls += 1;
        if let Some(kind) = wire.fail_with {
            return Err(io::Error::new(kind, "scripted failure"));
        }
        let n = match wire.quotas.pop_front() {
            Some(quota) => quota.min(buf.len()),
            None => buf.len(),
        };
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
        }
        wire.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn close(&mut self) {
        self.wire.borrow_mut().close_calls += 1;
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// What the pipeline does when run.
#[derive(Debug, Clone)]
pub enum Script {
    /// Record the run, write nothing.
    Idle,
    /// Send headers, then each body chunk; resumes where it stopped when blocked.
    Respond {
        status: u16,
        content_length: Option<u64>,
        chunks: Vec<(Vec<u8>, bool)>,
    },
    /// Close the whole connection from inside the run.
    CloseConnection,
}

impl Script {
    pub fn body(status: u16, body: &str) -> Self {
        Script::Respond {
            status,
            content_length: Some(body.len() as u64),
            chunks: vec![(body.as_bytes().to_vec(), true)],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub stream: Option<StreamId>,
    pub mode: RunMode,
    pub method: Option<Method>,
    pub url: String,
    pub host: Option<String>,
    pub headers: HeaderList,
}

#[derive(Debug, Default)]
pub struct PipelineLog {
    pub created: usize,
    pub runs: Vec<RunRecord>,
    pub closed: Vec<Request>,
    /// Watched wire; each close records whether the transport was already closed.
    pub wire: Option<SharedWire>,
    pub closed_after_transport: Vec<bool>,
    progress: HashMap<(ConnectionId, Option<StreamId>), usize>,
}

impl PipelineLog {
    pub fn starts(&self) -> Vec<&RunRecord> {
        self.runs.iter().filter(|r| r.mode == RunMode::Start).collect()
    }
}

pub type SharedPipelineLog = Rc<RefCell<PipelineLog>>;

pub struct TestPipeline {
    log: SharedPipelineLog,
    script: Script,
}

impl TestPipeline {
    pub fn new(script: Script) -> (Self, SharedPipelineLog) {
        let log = SharedPipelineLog::default();
        (
            Self {
                log: log.clone(),
                script,
            },
            log,
        )
    }
}

impl Pipeline for TestPipeline {
    fn request_new(&mut self, connection: ConnectionId) -> Request {
        self.log.borrow_mut().created += 1;
        Request::new(connection)
    }

    fn run(&mut self, req: &mut Request, sink: &mut dyn ResponseSink, mode: RunMode) {
        self.log.borrow_mut().runs.push(RunRecord {
            stream: req.stream,
            mode,
            method: req.method,
            url: req.url.clone(),
            host: req.host.clone(),
            headers: req.headers.clone(),
        });

        match &self.script {
            Script::Idle => {}
            Script::CloseConnection => sink.close_connection(),
            Script::Respond {
                status,
                content_length,
                chunks,
            } => {
                let key = (req.connection, req.stream);
                let mut step = self.log.borrow().progress.get(&key).copied().unwrap_or(0);

                if step == 0 {
                    req.response.status = *status;
                    req.response.content_length = *content_length;
                    match sink.response_headers(req) {
                        Ok(muxd::net::Flush::Done) => step = 1,
                        _ => return,
                    }
                }
                while step - 1 < chunks.len() {
                    let (data, finished) = &chunks[step - 1];
                    match sink.send_body(data, *finished) {
                        Ok(Some(n)) if n == data.len() => step += 1,
                        _ => break,
                    }
                }
                self.log.borrow_mut().progress.insert(key, step);
            }
        }
    }

    fn close(&mut self, req: &mut Request) {
        let mut log = self.log.borrow_mut();
        let transport_closed = log.wire.as_ref().map_or(false, |w| w.borrow().is_closed());
        log.closed_after_transport.push(transport_closed);
        log.closed.push(req.clone());
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SessionLog {
    pub created: usize,
    pub settings: Option<Http2Config>,
    pub inputs: Vec<Vec<u8>>,
    pub header_results: Vec<bool>,
    pub response_results: Vec<bool>,
    pub control_results: Vec<bool>,
    pub close_calls: usize,
    pub pings: usize,
    /// Returned from `idle_ping`.
    pub grace: Duration,
    /// Send a GOAWAY-like frame from `close`.
    pub goaway_on_close: bool,
}

pub type SharedSessionLog = Rc<RefCell<SessionLog>>;

/// Framing-library stand-in driven by a line protocol:
///
/// ```text
/// H <id> <name> <value>   header field
/// E <id>                  end of headers
/// B <id> <data>           body bytes
/// C <id>                  stream closed
/// R <id>                  stream ready to send (called back on schedule)
/// P <len>                 control frame of <len> bytes
/// X                       malformed input
/// ```
///
/// A leading connection preface is skipped. Only complete lines are consumed.
pub struct MockSession {
    log: SharedSessionLog,
    open: Vec<StreamId>,
    ready: Vec<StreamId>,
}

impl MockSession {
    fn close_stream(&mut self, id: StreamId, hooks: &mut dyn StreamHooks) {
        if let Some(pos) = self.open.iter().position(|s| *s == id) {
            self.open.remove(pos);
            self.ready.retain(|s| *s != id);
            hooks.stream_close(id);
        }
    }

    fn open_stream(&mut self, id: StreamId) {
        if !self.open.contains(&id) {
            self.open.push(id);
        }
    }
}

fn stream_arg(arg: Option<&str>) -> Result<StreamId> {
    arg.and_then(|s| s.parse().ok())
        .map(StreamId)
        .ok_or_else(|| Error::protocol("bad stream id"))
}

impl Session for MockSession {
    fn process_input(&mut self, input: &[u8], hooks: &mut dyn StreamHooks) -> Result<usize> {
        self.log.borrow_mut().inputs.push(input.to_vec());

        let mut consumed = 0;
        let preface = muxd::http2::preface::CONNECTION_PREFACE;
        if input.starts_with(preface) {
            consumed = preface.len();
        }

        while let Some(len) = input[consumed..].iter().position(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(&input[consumed..consumed + len]).into_owned();
            consumed += len + 1;

            let mut parts = line.splitn(4, ' ');
            match parts.next() {
                Some("H") => {
                    let id = stream_arg(parts.next())?;
                    let name = parts.next().unwrap_or("");
                    let value = parts.next().unwrap_or("");
                    self.open_stream(id);
                    let ok = hooks.stream_header(id, Some((name.as_bytes(), value.as_bytes())));
                    self.log.borrow_mut().header_results.push(ok);
                    if !ok {
                        // reset
                        self.close_stream(id, hooks);
                    }
                }
                Some("E") => {
                    let id = stream_arg(parts.next())?;
                    self.open_stream(id);
                    let field: HeaderField<'_> = None;
                    let ok = hooks.stream_header(id, field);
                    self.log.borrow_mut().header_results.push(ok);
                }
                Some("B") => {
                    let id = stream_arg(parts.next())?;
                    let data = parts.next().unwrap_or("");
                    hooks.stream_body(id, data.as_bytes());
                }
                Some("C") => {
                    let id = stream_arg(parts.next())?;
                    self.close_stream(id, hooks);
                }
                Some("R") => {
                    let id = stream_arg(parts.next())?;
                    self.ready.push(id);
                }
                Some("P") => {
                    let len: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                    let ok = hooks.control_frame(&vec![0xab; len]);
                    self.log.borrow_mut().control_results.push(ok);
                }
                _ => return Err(Error::protocol("scripted protocol error")),
            }
        }
        Ok(consumed)
    }

    fn schedule(&mut self, hooks: &mut dyn StreamHooks) {
        for id in self.ready.clone() {
            let ok = hooks.stream_response(id, 65_535);
            self.log.borrow_mut().response_results.push(ok);
        }
    }

    fn idle_ping(&mut self, hooks: &mut dyn StreamHooks) -> Duration {
        let grace = self.log.borrow().grace;
        if !grace.is_zero() {
            // PING frame: 9-byte header + 8 bytes opaque data
            let mut ping = vec![0u8; FRAME_HEADER_SIZE + 8];
            ping[2] = 8;
            ping[3] = 0x6;
            hooks.control_frame(&ping);
            self.log.borrow_mut().pings += 1;
        }
        grace
    }

    fn close(&mut self, hooks: &mut dyn StreamHooks) {
        self.log.borrow_mut().close_calls += 1;
        for id in self.open.clone() {
            self.close_stream(id, hooks);
        }
        if self.log.borrow().goaway_on_close {
            let ok = hooks.control_frame(GOAWAY_FRAME);
            self.log.borrow_mut().control_results.push(ok);
        }
    }
}

pub const GOAWAY_FRAME: &[u8] = b"GOAWAY-FRAME";

pub struct MockSessionFactory {
    log: SharedSessionLog,
}

impl MockSessionFactory {
    pub fn new() -> (Self, SharedSessionLog) {
        let log = SharedSessionLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl SessionFactory for MockSessionFactory {
    fn new_session(&mut self, _connection: ConnectionId, settings: &Http2Config) -> Box<dyn Session> {
        let mut log = self.log.borrow_mut();
        log.created += 1;
        log.settings = Some(settings.clone());
        Box::new(MockSession {
            log: self.log.clone(),
            open: Vec::new(),
            ready: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub worker: Worker,
    pub pipeline: SharedPipelineLog,
    pub session: SharedSessionLog,
}

impl Harness {
    pub fn new(script: Script) -> Self {
        let (pipeline, pipeline_log) = TestPipeline::new(script);
        let (sessions, session_log) = MockSessionFactory::new();
        let worker = Worker::new(Components {
            pipeline: Box::new(pipeline),
            http1: Box::new(Http1Parser::new()),
            sessions: Box::new(sessions),
        });
        Self {
            worker,
            pipeline: pipeline_log,
            session: session_log,
        }
    }

    /// Accept a connection on a plaintext listen.
    pub fn connect(&mut self, send_buffer_size: usize) -> (ConnectionId, SharedWire) {
        let (transport, wire) = RecordingTransport::new();
        let id = self
            .worker
            .accept(listen(send_buffer_size), Box::new(transport), peer())
            .unwrap();
        (id, wire)
    }
}

/// Split written bytes into HTTP/2 frames.
pub fn frames(mut bytes: &[u8]) -> Vec<(FrameHeader, Vec<u8>)> {
    let mut out = Vec::new();
    while let Some(header) = FrameHeader::parse(bytes) {
        let end = FRAME_HEADER_SIZE + header.length;
        out.push((header, bytes[FRAME_HEADER_SIZE..end].to_vec()));
        bytes = &bytes[end..];
    }
    out
}
