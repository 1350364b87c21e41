//! Response header block encoder (RFC 7541).
//!
//! Static-table-only: common `:status` values are sent indexed, `content-length`
//! reuses its static name, everything else is a literal without indexing.
//! No Huffman coding, no dynamic table, so the encoded length is known exactly
//! before anything is written.

use crate::request::header::is_connection_specific;
use crate::request::Response;

/// Static table indexes for `:status` values that have an exact entry.
const STATUS_INDEXED: [(u16, u8); 7] = [
    (200, 8),
    (204, 9),
    (206, 10),
    (304, 11),
    (400, 12),
    (404, 13),
    (500, 14),
];

/// Static table name index of `:status`.
const STATUS_NAME_INDEX: u64 = 8;
/// Static table name index of `content-length`.
const CONTENT_LENGTH_NAME_INDEX: u64 = 28;

/// HPACK encoder for response header blocks.
#[derive(Debug, Default)]
pub struct HeaderEncoder;

impl HeaderEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Exact size of the block [`encode`](Self::encode) would produce.
    pub fn encoded_len(&self, response: &Response) -> usize {
        let mut len = match status_index(response.status) {
            Some(_) => 1,
            None => int_len(STATUS_NAME_INDEX, 4) + str_len(digits(response.status as u64).len()),
        };
        if let Some(cl) = response.content_length {
            len += int_len(CONTENT_LENGTH_NAME_INDEX, 4) + str_len(digits(cl).len());
        }
        for h in response.headers.iter() {
            if is_connection_specific(&h.name) {
                continue;
            }
            len += 1 + str_len(h.name.len()) + str_len(h.value.len());
        }
        len
    }

    /// Encode `:status`, then `content-length` when declared, then the staged
    /// headers. Returns the block length, or `None` if `out` is too small.
    pub fn encode(&mut self, response: &Response, out: &mut [u8]) -> Option<usize> {
        let mut w = Writer { out, pos: 0 };

        match status_index(response.status) {
            // Indexed Header Field: 1xxxxxxx
            Some(idx) => w.integer(idx as u64, 7, 0x80)?,
            None => {
                // Literal without Indexing, indexed name: 0000xxxx
                w.integer(STATUS_NAME_INDEX, 4, 0x00)?;
                w.string(digits(response.status as u64).as_bytes(), false)?;
            }
        }

        if let Some(cl) = response.content_length {
            w.integer(CONTENT_LENGTH_NAME_INDEX, 4, 0x00)?;
            w.string(digits(cl).as_bytes(), false)?;
        }

        for h in response.headers.iter() {
            if is_connection_specific(&h.name) {
                continue;
            }
            // Literal without Indexing, new name
            w.byte(0x00)?;
            w.string(h.name.as_bytes(), true)?;
            w.string(h.value.as_bytes(), false)?;
        }

        Some(w.pos)
    }
}

fn status_index(status: u16) -> Option<u8> {
    STATUS_INDEXED
        .iter()
        .find(|(code, _)| *code == status)
        .map(|(_, idx)| *idx)
}

fn digits(n: u64) -> String {
    n.to_string()
}

fn int_len(mut value: u64, prefix_bits: u8) -> usize {
    let max = (1u64 << prefix_bits) - 1;
    if value < max {
        return 1;
    }
    value -= max;
    let mut len = 2;
    while value >= 128 {
        value >>= 7;
        len += 1;
    }
    len
}

fn str_len(len: usize) -> usize {
    int_len(len as u64, 7) + len
}

struct Writer<'a> {
    out: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn byte(&mut self, b: u8) -> Option<()> {
        *self.out.get_mut(self.pos)? = b;
        self.pos += 1;
        Some(())
    }

    fn integer(&mut self, mut value: u64, prefix_bits: u8, pattern: u8) -> Option<()> {
        let max = (1u64 << prefix_bits) - 1;
        if value < max {
            return self.byte(pattern | value as u8);
        }
        self.byte(pattern | max as u8)?;
        value -= max;
        while value >= 128 {
            self.byte((value % 128) as u8 | 0x80)?;
            value /= 128;
        }
        self.byte(value as u8)
    }

    /// String literal, H=0.
    fn string(&mut self, s: &[u8], lowercase: bool) -> Option<()> {
        self.integer(s.len() as u64, 7, 0x00)?;
        let dst = self.out.get_mut(self.pos..self.pos + s.len())?;
        if lowercase {
            for (d, c) in dst.iter_mut().zip(s) {
                *d = c.to_ascii_lowercase();
            }
        } else {
            dst.copy_from_slice(s);
        }
        self.pos += s.len();
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(response: &Response) -> Vec<u8> {
        let mut enc = HeaderEncoder::new();
        let mut out = vec![0u8; 4096];
        let n = enc.encode(response, &mut out).unwrap();
        assert_eq!(n, enc.encoded_len(response));
        out.truncate(n);
        out
    }

    #[test]
    fn status_200_is_indexed() {
        assert_eq!(encode(&Response::default()), [0x88]);
    }

    #[test]
    fn other_status_uses_name_index() {
        let response = Response {
            status: 201,
            ..Response::default()
        };
        assert_eq!(encode(&response), [0x08, 0x03, b'2', b'0', b'1']);
    }

    #[test]
    fn content_length_follows_status() {
        let response = Response {
            status: 404,
            content_length: Some(42),
            ..Response::default()
        };
        assert_eq!(encode(&response), [0x8d, 0x0f, 0x0d, 0x02, b'4', b'2']);
    }

    #[test]
    fn names_lowercased_and_hop_by_hop_dropped() {
        let mut response = Response::default();
        response.headers.push("Content-Type", "text/plain");
        response.headers.push("Connection", "keep-alive");
        response.headers.push("Transfer-Encoding", "chunked");

        let block = encode(&response);
        let mut expected = vec![0x88, 0x00, 12];
        expected.extend_from_slice(b"content-type");
        expected.push(10);
        expected.extend_from_slice(b"text/plain");
        assert_eq!(block, expected);
    }

    #[test]
    fn long_value_uses_multibyte_length() {
        let mut response = Response::default();
        response.headers.push("x", "v".repeat(200));
        let block = encode(&response);
        // 200 - 127 = 73
        assert_eq!(&block[..6], &[0x88, 0x00, 0x01, b'x', 0x7f, 73]);
        assert_eq!(block.len(), 6 + 200);
    }

    #[test]
    fn short_output_fails() {
        let mut response = Response::default();
        response.headers.push("server", "muxd");
        let mut enc = HeaderEncoder::new();
        let mut out = [0u8; 4];
        assert!(enc.encode(&response, &mut out).is_none());
    }
}
