//! HTTP/2 frame header layout (RFC 9113 §4).
//!
//! Only what response framing needs: the adapter writes HEADERS and DATA
//! frames; everything else comes pre-framed from the session.
//! ```text
//!  +-----------------------------------------------+
//!  |                 Length (24)                     |
//!  +---------------+---------------+---------------+
//!  |   Type (8)    |   Flags (8)   |
//!  +-+-------------+---------------+------+--------+
//!  |R|                Stream Identifier (31)        |
//!  +-+----------------------------------------------+
//! ```

/// Size of every frame header.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Default SETTINGS_MAX_FRAME_SIZE; the adapter never sends larger payloads.
pub const MAX_FRAME_SIZE: usize = 16_384;

pub const FRAME_DATA: u8 = 0x0;
pub const FRAME_HEADERS: u8 = 0x1;

pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;

/// Write a frame header into the first nine bytes of `buf`.
///
/// Panics if `buf` is shorter than [`FRAME_HEADER_SIZE`]; callers always pass
/// a reserved header slot.
pub fn write_header(buf: &mut [u8], length: usize, frame_type: u8, flags: u8, stream_id: u32) {
    let length = length as u32;
    buf[0] = ((length >> 16) & 0xff) as u8;
    buf[1] = ((length >> 8) & 0xff) as u8;
    buf[2] = (length & 0xff) as u8;
    buf[3] = frame_type;
    buf[4] = flags;
    let id_bytes = stream_id.to_be_bytes();
    buf[5] = id_bytes[0] & 0x7f; // Clear reserved bit
    buf[6] = id_bytes[1];
    buf[7] = id_bytes[2];
    buf[8] = id_bytes[3];
}

/// Parsed frame header, used by tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let length = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | (buf[2] as usize);
        let stream_id = u32::from_be_bytes([buf[5] & 0x7f, buf[6], buf[7], buf[8]]);
        Some(Self {
            length,
            frame_type: buf[3],
            flags: buf[4],
            stream_id,
        })
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        write_header(&mut buf, 0x01_02_03, FRAME_HEADERS, FLAG_END_HEADERS, 5);
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x01, 0x04, 0, 0, 0, 5]);

        let parsed = FrameHeader::parse(&buf).unwrap();
        assert_eq!(parsed.length, 0x01_02_03);
        assert!(parsed.has(FLAG_END_HEADERS));
        assert!(!parsed.has(FLAG_END_STREAM));
    }

    #[test]
    fn reserved_bit_cleared() {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        write_header(&mut buf, 0, FRAME_DATA, FLAG_END_STREAM, 0x8000_0003);
        assert_eq!(FrameHeader::parse(&buf).unwrap().stream_id, 3);
    }

    #[test]
    fn short_buffer_does_not_parse() {
        assert!(FrameHeader::parse(&[0u8; 8]).is_none());
    }
}
