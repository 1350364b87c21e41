//! Protocol dispatch for driver events.
//!
//! Every entry point finishes with [`Connection::settle`], so a close requested
//! from inside a handler or session hook tears the protocol down as soon as
//! that call has returned.

use crate::error::{Error, Result};
use crate::http1::Http1Context;
use crate::http2::adapter::connection_init;
use crate::http2::preface::{self, PrefaceMatch};
use crate::net::connection::{ConnectionId, Flush, Protocol};
use crate::net::tls::ALPN_H2;
use crate::net::transport::CloseReason;
use crate::worker::Worker;

impl Worker {
    /// Inbound bytes. Returns how many were consumed; the driver offers the
    /// rest again with the next read.
    pub fn on_readable(&mut self, id: ConnectionId, input: &[u8]) -> Result<usize> {
        let Worker {
            connections,
            defer,
            pipeline,
            http1,
            sessions,
        } = self;
        let Some(conn) = connections.get_mut(&id) else {
            return Err(Error::Closed);
        };
        if conn.io.is_closed() {
            return Err(Error::Closed);
        }
        conn.io.touch();

        // h2c with prior knowledge
        let idle_plaintext = matches!(&conn.proto, Protocol::Http1(h1) if h1.is_idle())
            && !conn.io.listen().is_tls();
        if idle_plaintext {
            match preface::detect(input) {
                PrefaceMatch::Full => {
                    connection_init(conn, sessions.as_mut(), pipeline.as_mut());
                }
                PrefaceMatch::Partial => return Ok(0),
                PrefaceMatch::No => {}
            }
        }

        let mut upgrade = false;
        let mut result = match &mut conn.proto {
            Protocol::Http2(h2) => h2.on_read(&mut conn.io, defer, pipeline.as_mut(), input),
            Protocol::Http1(h1) => {
                let mut cx = Http1Context::new(&mut conn.io, h1, defer, pipeline.as_mut());
                let result = http1.on_read(&mut cx, input);
                upgrade = cx.upgrade_requested();
                result
            }
        };
        conn.settle(defer, pipeline.as_mut());

        if upgrade && !conn.io.is_closed() {
            connection_init(conn, sessions.as_mut(), pipeline.as_mut());
            if let Ok(consumed) = result {
                let rest = &input[consumed..];
                if !rest.is_empty() {
                    if let Protocol::Http2(h2) = &mut conn.proto {
                        result = h2
                            .on_read(&mut conn.io, defer, pipeline.as_mut(), rest)
                            .map(|n| consumed + n);
                    }
                    conn.settle(defer, pipeline.as_mut());
                }
            }
        }

        if let Err(e) = &result {
            tracing::warn!(
                connection_id = %id,
                peer = %conn.io.peer(),
                error = %e,
                "Failed to process input"
            );
        }
        result
    }

    /// The transport can take more bytes.
    ///
    /// Pending output goes first; the protocol is only asked for more once the
    /// buffer is empty. A write failure is returned for the driver to close on.
    pub fn on_writable(&mut self, id: ConnectionId) -> Result<()> {
        let Worker {
            connections,
            defer,
            pipeline,
            http1,
            sessions,
        } = self;
        let Some(conn) = connections.get_mut(&id) else {
            return Ok(());
        };
        if conn.io.is_closed() {
            return Ok(());
        }

        match conn.io.flush()? {
            Flush::Done => {}
            Flush::Again => return Ok(()),
        }

        let mut upgrade = false;
        match &mut conn.proto {
            Protocol::Http2(h2) => h2.on_writable(&mut conn.io, defer, pipeline.as_mut()),
            Protocol::Http1(h1) => {
                let mut cx = Http1Context::new(&mut conn.io, h1, defer, pipeline.as_mut());
                http1.on_writable(&mut cx);
                upgrade = cx.upgrade_requested();
            }
        }
        conn.settle(defer, pipeline.as_mut());

        if upgrade && !conn.io.is_closed() {
            connection_init(conn, sessions.as_mut(), pipeline.as_mut());
        }
        Ok(())
    }

    /// The driver gave up on the connection.
    pub fn on_close(&mut self, id: ConnectionId, reason: CloseReason) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if conn.io.is_closed() {
            return;
        }

        if conn.io.listen().is_tls() {
            if let Some(err) = conn.io.transport().security_error() {
                tracing::debug!(connection_id = %id, tls_error = %err, "TLS error");
            }
        }
        match &reason {
            CloseReason::ReadError(e) | CloseReason::WriteError(e) => {
                tracing::debug!(
                    connection_id = %id,
                    reason = %reason,
                    os_error = ?e.raw_os_error(),
                    "Closing connection"
                );
            }
            _ => {
                tracing::debug!(connection_id = %id, reason = %reason, "Closing connection");
            }
        }

        conn.close(&mut self.defer, self.pipeline.as_mut());
    }

    /// TLS handshake finished with the given ALPN protocol.
    pub fn on_negotiated(&mut self, id: ConnectionId, alpn: Option<&[u8]>) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if conn.io.is_closed() {
            return;
        }

        tracing::debug!(
            connection_id = %id,
            alpn = %alpn.map(String::from_utf8_lossy).unwrap_or_default(),
            "Protocol negotiated"
        );
        if alpn == Some(ALPN_H2) {
            connection_init(conn, self.sessions.as_mut(), self.pipeline.as_mut());
        }
    }
}
