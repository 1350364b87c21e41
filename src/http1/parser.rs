//! Minimal HTTP/1.1 request handler.
//!
//! Parses the request head, skips any `content-length` body and runs the
//! pipeline. Requests are served one at a time; bytes of a pipelined request
//! stay unconsumed until the current response is done.

use crate::error::{Error, Result};
use crate::http1::{Http1Context, Http1Handler};
use crate::request::{Method, Request, RequestState, RunMode};

/// Largest request head accepted before the connection is dropped.
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

#[derive(Debug, Default)]
pub struct Http1Parser;

impl Http1Parser {
    pub fn new() -> Self {
        Self
    }

    /// Close out the request once its response is fully written.
    fn complete(&mut self, cx: &mut Http1Context<'_>) {
        if !cx.response_done() {
            return;
        }
        let keep_alive = cx.keep_alive();
        cx.finish_request();
        if !keep_alive {
            cx.close();
        }
    }
}

impl Http1Handler for Http1Parser {
    fn on_read(&mut self, cx: &mut Http1Context<'_>, input: &[u8]) -> Result<usize> {
        let mut consumed = skip_body(cx, input);
        if cx.body_remaining() > 0 || cx.request().is_some() {
            return Ok(consumed);
        }

        let rest = &input[consumed..];
        let Some(head_len) = find_head_end(rest) else {
            if rest.len() > MAX_HEAD_SIZE {
                return Err(Error::protocol("request head too large"));
            }
            return Ok(consumed);
        };

        let req = cx.start_request();
        let http10 = parse_head(req, &rest[..head_len])?;
        let keep_alive = !wants_close(req, http10);
        consumed += head_len + 4;

        let body = match req.headers.get("content-length") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::protocol("invalid content-length"))?,
            None => 0,
        };
        req.state = RequestState::ProcessingHeaders;

        cx.set_keep_alive(keep_alive);
        cx.set_body_remaining(body);
        consumed += skip_body(cx, &input[consumed..]);

        tracing::debug!(
            connection_id = %cx.connection_id(),
            method = ?cx.request().and_then(|r| r.method),
            url = %cx.request().map(|r| r.url.as_str()).unwrap_or(""),
            "HTTP/1 request"
        );

        cx.run_request(RunMode::Start);
        self.complete(cx);
        Ok(consumed)
    }

    fn on_writable(&mut self, cx: &mut Http1Context<'_>) {
        if cx.run_request(RunMode::Resume) {
            self.complete(cx);
        }
    }
}

/// Drop up to the remaining body length from the front of `input`.
fn skip_body(cx: &mut Http1Context<'_>, input: &[u8]) -> usize {
    let remaining = cx.body_remaining();
    let n = remaining.min(input.len() as u64);
    cx.set_body_remaining(remaining - n);
    n as usize
}

/// Length of the head, excluding the blank line.
fn find_head_end(input: &[u8]) -> Option<usize> {
    input.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Fill `req` from the request head. Returns true for HTTP/1.0.
fn parse_head(req: &mut Request, head: &[u8]) -> Result<bool> {
    let head = std::str::from_utf8(head).map_err(|_| Error::protocol("request head is not UTF-8"))?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::protocol("malformed request line"));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(Error::protocol("unsupported HTTP version"));
    }

    req.method = Some(
        Method::from_bytes(method.as_bytes()).ok_or_else(|| Error::protocol("unknown method"))?,
    );
    req.url = target.to_string();

    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::protocol("malformed header line"))?;
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("host") {
            req.host = Some(value.to_string());
        }
        req.headers.push(name, value);
    }
    Ok(version == "HTTP/1.0")
}

/// `Connection: close`, or HTTP/1.0 without keep-alive.
fn wants_close(req: &Request, http10: bool) -> bool {
    let connection = req.headers.get("connection").unwrap_or("");
    if connection.eq_ignore_ascii_case("close") {
        return true;
    }
    http10 && !connection.eq_ignore_ascii_case("keep-alive")
}
