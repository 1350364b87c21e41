//! TCP transport for the tokio driver, with optional server-side TLS.
//!
//! The driver task keeps reading from the same socket, so the socket is shared
//! through an `Rc<TcpChannel>`. Writes never wait: `try_write` either takes
//! bytes now or reports `WouldBlock`, and the connection core treats that as
//! backpressure. Whoever hits backpressure wakes the driver task through
//! `blocked`, so it starts polling for writability even when the write came
//! from the timer task.
//!
//! TLS runs as a sans-io rustls `ServerConnection` inside the channel. The
//! core's `Transport::write` is synchronous, so records are pushed to the
//! socket with `try_write` and anything left over waits in rustls until the
//! socket turns writable again.

use std::cell::{Cell, RefCell};
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::sync::Arc;

use rustls::ServerConnection;
use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::net::transport::Transport;

/// Outcome of one read from the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    /// Plaintext bytes appended to the caller's buffer; zero is allowed.
    Data(usize),
    /// The peer closed its side.
    Eof,
}

/// Result of a finished TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub alpn: Option<Vec<u8>>,
}

/// Socket plus TLS state shared by a transport and its driver task.
pub struct TcpChannel {
    stream: TcpStream,
    tls: RefCell<Option<ServerConnection>>,
    handshake_reported: Cell<bool>,
    negotiated: RefCell<Option<Negotiated>>,
    security_error: RefCell<Option<String>>,
    closed: Cell<bool>,
    close_notify: Notify,
    blocked_notify: Notify,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            tls: RefCell::new(None),
            handshake_reported: Cell::new(false),
            negotiated: RefCell::new(None),
            security_error: RefCell::new(None),
            closed: Cell::new(false),
            close_notify: Notify::new(),
            blocked_notify: Notify::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Encrypted bytes are still waiting for the socket.
    pub fn wants_write(&self) -> bool {
        self.tls.borrow().as_ref().map_or(false, |tls| tls.wants_write())
    }

    /// Resolve once the transport has been closed.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_notify.notified().await;
    }

    /// Resolve once a write hit backpressure.
    pub async fn blocked(&self) {
        self.blocked_notify.notified().await;
    }

    pub async fn ready(&self, interest: Interest) -> io::Result<Ready> {
        self.stream.ready(interest).await
    }

    /// The handshake result, reported once after the handshake completes.
    pub fn take_negotiated(&self) -> Option<Negotiated> {
        self.negotiated.borrow_mut().take()
    }

    /// Read what the socket has and append the plaintext to `pending`.
    pub fn read(&self, chunk: &mut [u8], pending: &mut Vec<u8>) -> io::Result<ReadEvent> {
        let mut guard = self.tls.borrow_mut();
        let Some(tls) = guard.as_mut() else {
            return match self.stream.try_read(chunk) {
                Ok(0) => Ok(ReadEvent::Eof),
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    Ok(ReadEvent::Data(n))
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadEvent::Data(0)),
                Err(e) => Err(e),
            };
        };

        let mut eof = false;
        match tls.read_tls(&mut SocketIo(&self.stream)) {
            Ok(0) => eof = true,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        if let Err(e) = tls.process_new_packets() {
            let message = e.to_string();
            *self.security_error.borrow_mut() = Some(message.clone());
            // the alert, if rustls queued one
            let _ = self.write_tls(tls);
            return Err(io::Error::new(io::ErrorKind::InvalidData, message));
        }

        let mut got = 0;
        loop {
            match tls.reader().read(chunk) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    got += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // peer dropped the socket without close_notify
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    eof = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if !tls.is_handshaking() && !self.handshake_reported.replace(true) {
            *self.negotiated.borrow_mut() = Some(Negotiated {
                alpn: tls.alpn_protocol().map(<[u8]>::to_vec),
            });
        }

        self.write_tls(tls)?;

        if got == 0 && eof {
            return Ok(ReadEvent::Eof);
        }
        Ok(ReadEvent::Data(got))
    }

    /// Push pending TLS records to the socket.
    pub fn flush_tls(&self) -> io::Result<()> {
        match self.tls.borrow_mut().as_mut() {
            Some(tls) => self.write_tls(tls),
            None => Ok(()),
        }
    }

    fn write_tls(&self, tls: &mut ServerConnection) -> io::Result<()> {
        while tls.wants_write() {
            match tls.write_tls(&mut SocketIo(&self.stream)) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.blocked_notify.notify_one();
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }

        let mut guard = self.tls.borrow_mut();
        let Some(tls) = guard.as_mut() else {
            return match self.stream.try_write(buf) {
                Ok(n) => {
                    if n < buf.len() {
                        self.blocked_notify.notify_one();
                    }
                    Ok(n)
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.blocked_notify.notify_one();
                    Ok(0)
                }
                Err(e) => Err(e),
            };
        };

        // older records first
        self.write_tls(tls)?;
        if tls.wants_write() {
            return Ok(0);
        }

        let n = tls.writer().write(buf)?;
        self.write_tls(tls)?;
        if n < buf.len() {
            self.blocked_notify.notify_one();
        }
        Ok(n)
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        if let Some(tls) = self.tls.borrow_mut().as_mut() {
            tls.send_close_notify();
            let _ = self.write_tls(tls);
        }
        self.close_notify.notify_one();
    }

    fn enable_tls(&self, config: Arc<rustls::ServerConfig>) -> io::Result<()> {
        let tls = ServerConnection::new(config).map_err(io::Error::other)?;
        *self.tls.borrow_mut() = Some(tls);
        Ok(())
    }
}

/// Non-blocking socket view for rustls.
struct SocketIo<'a>(&'a TcpStream);

impl Read for SocketIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl Write for SocketIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Write side handed to the connection core.
pub struct TcpTransport {
    channel: Rc<TcpChannel>,
}

impl TcpTransport {
    pub fn new(channel: Rc<TcpChannel>) -> Self {
        Self { channel }
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf)
    }

    fn close(&mut self) {
        self.channel.close();
    }

    fn enable_tls(&mut self, config: Arc<rustls::ServerConfig>) -> io::Result<()> {
        self.channel.enable_tls(config)
    }

    fn security_error(&self) -> Option<String> {
        self.channel.security_error.borrow().clone()
    }
}
