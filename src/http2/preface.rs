//! Prior-knowledge HTTP/2 detection on plaintext connections.

/// Client connection preface (RFC 9113 §3.4).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// How far the input matches the connection preface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefaceMatch {
    /// The complete preface is present.
    Full,
    /// The input is a strict prefix of the preface; wait for more.
    Partial,
    /// Not HTTP/2.
    No,
}

/// Compare the start of `input` with the connection preface.
pub fn detect(input: &[u8]) -> PrefaceMatch {
    let n = input.len().min(CONNECTION_PREFACE.len());
    if input[..n] != CONNECTION_PREFACE[..n] {
        return PrefaceMatch::No;
    }
    if n == CONNECTION_PREFACE.len() {
        PrefaceMatch::Full
    } else {
        PrefaceMatch::Partial
    }
}
