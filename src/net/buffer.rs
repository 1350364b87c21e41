//! Per-connection send buffer.
//!
//! A single linear region with a write cursor. Bytes are appended at the
//! cursor and drained from the front by the transport; a short write moves the
//! unwritten remainder back to the start so the buffer never reorders data.
//!
//! Framed protocols reserve header space ahead of a payload before the payload
//! length is known, fill the payload in place, then backfill the header:
//!
//! ```text
//! [ pending bytes | header slack | payload ............ | trailer ]
//!                 ^ reserve()    ^ payload_mut()          commit() advances past all
//! ```

use crate::error::{Error, Result};

/// Bounded send buffer, allocated lazily.
#[derive(Debug)]
pub struct SendBuffer {
    data: Option<Vec<u8>>,
    pos: usize,
    size: usize,
    slack: usize,
}

/// Space set aside by [`SendBuffer::reserve`], consumed by [`SendBuffer::commit`].
#[derive(Debug)]
#[must_use = "a reservation must be committed or abandoned"]
pub struct Reservation {
    start: usize,
    header_len: usize,
    trailer_len: usize,
    payload_cap: usize,
}

impl Reservation {
    /// Bytes available for payload between header and trailer.
    pub fn payload_capacity(&self) -> usize {
        self.payload_cap
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Shrink the payload region, e.g. to respect a maximum frame size.
    pub fn limit(mut self, max_payload: usize) -> Self {
        self.payload_cap = self.payload_cap.min(max_payload);
        self
    }
}

impl SendBuffer {
    /// Create an unallocated buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: None,
            pos: 0,
            size,
            slack: 0,
        }
    }

    /// Total capacity: configured size plus protocol slack.
    pub fn capacity(&self) -> usize {
        self.size + self.slack
    }

    /// Extra room for one protocol frame header on top of the configured size.
    pub fn set_slack(&mut self, slack: usize) {
        self.slack = slack;
        if let Some(data) = self.data.as_mut() {
            data.resize(self.size + slack, 0);
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.data.is_some()
    }

    /// Allocate backing storage if not yet present.
    pub fn allocate(&mut self) -> Result<()> {
        if self.data.is_some() {
            return Ok(());
        }
        let capacity = self.capacity();
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| Error::Allocation)?;
        data.resize(capacity, 0);
        self.data = Some(data);
        self.pos = 0;
        Ok(())
    }

    /// Number of buffered, unwritten bytes.
    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    /// Free space after the cursor. An unallocated buffer reports full capacity.
    pub fn available(&self) -> usize {
        self.capacity() - self.pos
    }

    /// Buffered bytes awaiting the transport.
    pub fn pending(&self) -> &[u8] {
        match &self.data {
            Some(data) => &data[..self.pos],
            None => &[],
        }
    }

    /// Writable region after the cursor. Empty if unallocated.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let pos = self.pos;
        match self.data.as_mut() {
            Some(data) => &mut data[pos..],
            None => &mut [],
        }
    }

    /// Move the cursor forward after writing into [`spare_mut`](Self::spare_mut).
    /// Returns how far it moved: never past the end, never on an unallocated buffer.
    pub fn advance(&mut self, n: usize) -> usize {
        if !self.is_allocated() {
            return 0;
        }
        let n = n.min(self.available());
        self.pos += n;
        n
    }

    /// Copy `bytes` at the cursor. Returns false if they do not fit.
    pub fn extend(&mut self, bytes: &[u8]) -> bool {
        if !self.is_allocated() || bytes.len() > self.available() {
            return false;
        }
        self.spare_mut()[..bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        true
    }

    /// Drop `n` written bytes from the front, compacting the remainder to the start.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.pos);
        if n == 0 {
            return;
        }
        if let Some(data) = self.data.as_mut() {
            data.copy_within(n..self.pos, 0);
        }
        self.pos -= n;
    }

    /// Reset the cursor to the start, keeping the allocation.
    pub fn clear(&mut self) {
        self.pos = 0;
    }

    /// Drop the backing allocation.
    pub fn release(&mut self) {
        self.data = None;
        self.pos = 0;
    }

    /// Reserve `header_len` bytes at the cursor followed by a payload region and
    /// `trailer_len` bytes after it. The cursor does not move until commit.
    pub fn reserve(&mut self, header_len: usize, trailer_len: usize) -> Option<Reservation> {
        if !self.is_allocated() {
            return None;
        }
        let overhead = header_len + trailer_len;
        if self.available() < overhead {
            return None;
        }
        Some(Reservation {
            start: self.pos,
            header_len,
            trailer_len,
            payload_cap: self.available() - overhead,
        })
    }

    /// Payload region of a reservation.
    pub fn payload_mut(&mut self, r: &Reservation) -> &mut [u8] {
        let begin = r.start + r.header_len;
        match self.data.as_mut() {
            Some(data) => &mut data[begin..begin + r.payload_cap],
            None => &mut [],
        }
    }

    /// Finish a reservation holding `payload_len` bytes: `fill_header` writes the
    /// header into the reserved slack, `trailer` is copied right after the payload.
    /// Returns total bytes added (header + payload + trailer).
    pub fn commit<F>(&mut self, r: Reservation, payload_len: usize, trailer: &[u8], fill_header: F) -> usize
    where
        F: FnOnce(&mut [u8]),
    {
        // released in between (connection closed): nothing to commit into
        let Some(data) = self.data.as_mut() else {
            return 0;
        };
        if payload_len > r.payload_cap || trailer.len() > r.trailer_len || r.start != self.pos {
            tracing::error!(
                payload_len,
                payload_cap = r.payload_cap,
                trailer_len = trailer.len(),
                stale = r.start != self.pos,
                "Reservation misuse, nothing committed"
            );
            return 0;
        }

        fill_header(&mut data[r.start..r.start + r.header_len]);
        let trailer_at = r.start + r.header_len + payload_len;
        data[trailer_at..trailer_at + trailer.len()].copy_from_slice(trailer);

        let total = r.header_len + payload_len + trailer.len();
        self.pos += total;
        total
    }

    /// Give up a reservation without writing anything.
    pub fn abandon(&mut self, r: Reservation) {
        debug_assert!(self.data.is_none() || r.start == self.pos);
    }
}
