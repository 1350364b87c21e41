//! HTTP/1.1 response framing.
//!
//! Bodies of unknown length go out chunked. Chunk sizes are written with a
//! fixed width so the chunk header can be reserved before the payload size is
//! known, same as an HTTP/2 DATA frame header.

use std::fmt::Write as _;

use crate::error::Result;
use crate::net::buffer::Reservation;
use crate::net::connection::{ConnectionId, ConnectionIo, Flush, Space};
use crate::net::defer::DeferQueue;
use crate::request::{Request, RequestState, ResponseSink};

/// `{:06x}\r\n`
const CHUNK_HEADER_LEN: usize = 8;
/// Largest chunk the fixed-width size field can describe.
const MAX_CHUNK: usize = 0xff_ffff;
const CHUNK_END: &[u8] = b"\r\n";
const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Reason phrase for a status code; empty for unregistered codes.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

/// Writes an HTTP/1.1 response into the connection's send buffer.
pub struct Http1Responder<'a> {
    io: &'a mut ConnectionIo,
    defer: &'a mut DeferQueue,
    done: &'a mut bool,
    chunked: bool,
}

impl<'a> Http1Responder<'a> {
    pub(crate) fn new(
        io: &'a mut ConnectionIo,
        defer: &'a mut DeferQueue,
        done: &'a mut bool,
        chunked: bool,
    ) -> Self {
        Self {
            io,
            defer,
            done,
            chunked,
        }
    }

    fn trailer_len(&self) -> usize {
        if self.chunked {
            CHUNK_END.len() + LAST_CHUNK.len()
        } else {
            0
        }
    }

    fn header_len(&self) -> usize {
        if self.chunked {
            CHUNK_HEADER_LEN
        } else {
            0
        }
    }
}

impl ResponseSink for Http1Responder<'_> {
    fn connection_id(&self) -> ConnectionId {
        self.io.id()
    }

    fn response_headers(&mut self, req: &mut Request) -> Result<Flush> {
        let response = &req.response;
        self.chunked = response.content_length.is_none();

        let mut head = String::with_capacity(128 + response.headers.staged_len());
        let _ = write!(
            head,
            "HTTP/1.1 {} {}\r\n",
            response.status,
            reason_phrase(response.status)
        );
        match response.content_length {
            Some(n) => {
                let _ = write!(head, "content-length: {}\r\n", n);
            }
            None => head.push_str("transfer-encoding: chunked\r\n"),
        }
        for h in response.headers.iter() {
            if h.name.eq_ignore_ascii_case("content-length")
                || h.name.eq_ignore_ascii_case("transfer-encoding")
            {
                continue;
            }
            let _ = write!(head, "{}: {}\r\n", h.name, h.value);
        }
        head.push_str("\r\n");

        if !self.io.append(head.as_bytes(), self.defer)? {
            return Ok(Flush::Again);
        }

        req.state = RequestState::Responding;
        if response.content_length == Some(0) {
            *self.done = true;
        }
        Ok(Flush::Done)
    }

    fn reserve_body(&mut self, want: usize) -> Result<Option<Reservation>> {
        let (header_len, trailer_len) = (self.header_len(), self.trailer_len());
        let capacity = self.io.buffer().capacity();
        let size = (want + header_len + trailer_len).min(capacity);
        match self.io.make_space(size, self.defer)? {
            Space::Blocked => Ok(None),
            Space::Ready(_) => Ok(self
                .io
                .buffer_mut()
                .reserve(header_len, trailer_len)
                .map(|r| r.limit(MAX_CHUNK))),
        }
    }

    fn body_mut(&mut self, reservation: &Reservation) -> &mut [u8] {
        self.io.buffer_mut().payload_mut(reservation)
    }

    fn commit_body(&mut self, reservation: Reservation, len: usize, finished: bool) -> usize {
        if finished {
            *self.done = true;
        }

        if !self.chunked {
            return self.io.buffer_mut().commit(reservation, len, &[], |_| {});
        }

        if len == 0 {
            self.io.buffer_mut().abandon(reservation);
            if !finished {
                return 0;
            }
            // the reservation held at least this much
            let buffer = self.io.buffer_mut();
            return if buffer.extend(LAST_CHUNK) {
                LAST_CHUNK.len()
            } else {
                0
            };
        }

        let mut trailer = [0u8; 7];
        trailer[..2].copy_from_slice(CHUNK_END);
        let mut trailer_len = CHUNK_END.len();
        if finished {
            trailer[2..].copy_from_slice(LAST_CHUNK);
            trailer_len += LAST_CHUNK.len();
        }

        self.io
            .buffer_mut()
            .commit(reservation, len, &trailer[..trailer_len], |hdr| {
                let size = format!("{:06x}\r\n", len);
                hdr.copy_from_slice(size.as_bytes());
            })
    }

    fn abandon_body(&mut self, reservation: Reservation) {
        self.io.buffer_mut().abandon(reservation);
    }

    fn close_connection(&mut self) {
        self.io.close(self.defer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_reason_phrases() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(599), "");
    }

    #[test]
    fn chunk_header_is_fixed_width() {
        assert_eq!(format!("{:06x}\r\n", MAX_CHUNK).len(), CHUNK_HEADER_LEN);
        assert_eq!(format!("{:06x}\r\n", 10).len(), CHUNK_HEADER_LEN);
    }
}
