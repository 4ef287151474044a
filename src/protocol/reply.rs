//! Reply encoding: the growable output value.

use super::{pack_tag, read_u32_le, write_u32_le, Kind, Sort, BLOCK_HEADER_SIZE};

/// The reply buffer handed to every operation.
///
/// Five bytes at offset 0 are reserved for the result block's header and
/// start zeroed; the payload accumulates behind them. The buffer grows as
/// needed and never truncates a value to fit, so a result longer than the
/// client's declared capacity still arrives whole.
#[derive(Debug)]
pub struct ReplyBuffer {
    data: Vec<u8>,
    declared: usize,
}

impl ReplyBuffer {
    /// Allocate a reply buffer with `capacity` bytes reserved up front.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut data = Vec::with_capacity(capacity.max(BLOCK_HEADER_SIZE));
        data.resize(BLOCK_HEADER_SIZE, 0);
        Self {
            data,
            declared: capacity,
        }
    }

    /// The capacity the client declared for this reply. Values are never
    /// truncated to it, but a few operations refuse results that would
    /// not have fit a fixed-size caller.
    pub fn declared_capacity(&self) -> usize {
        self.declared
    }

    /// The full encoded reply, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The result payload behind the reserved header.
    pub fn payload(&self) -> &[u8] {
        &self.data[BLOCK_HEADER_SIZE.min(self.data.len())..]
    }

    /// Payload length in bytes.
    pub fn payload_len(&self) -> usize {
        self.data.len().saturating_sub(BLOCK_HEADER_SIZE)
    }

    /// Current allocation of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Drop any accumulated payload, keeping the reserved header bytes.
    pub fn reset(&mut self) {
        self.data.truncate(BLOCK_HEADER_SIZE);
        self.data.resize(BLOCK_HEADER_SIZE, 0);
        for b in &mut self.data[..BLOCK_HEADER_SIZE] {
            *b = 0;
        }
    }

    /// Append payload bytes, growing the buffer when needed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Rewrite the result header at offset 0 with the final payload
    /// length and the packed tag.
    pub fn finish(&mut self, sort: Sort, kind: Kind) {
        let len = self.payload_len() as u32;
        write_u32_le(&mut self.data[..4], len);
        self.data[4] = pack_tag(sort, kind);
    }

    /// Replace the payload with `bytes` and finish the block in one step.
    pub fn set_value(&mut self, sort: Sort, kind: Kind, bytes: &[u8]) {
        self.reset();
        self.append(bytes);
        self.finish(sort, kind);
    }

    /// Replace the entire buffer with unframed bytes. Used by the version
    /// banner when no connection is open and replies are read as plain
    /// text rather than a block stream.
    pub fn set_raw(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    /// Zero-filled writable payload region of exactly `len` bytes, for
    /// engines that write results through a raw pointer. Commit with
    /// [`ReplyBuffer::commit_fill`] once the engine reports how much it
    /// wrote.
    pub fn fill_region(&mut self, len: usize) -> &mut [u8] {
        self.data.truncate(BLOCK_HEADER_SIZE);
        self.data.resize(BLOCK_HEADER_SIZE + len, 0);
        &mut self.data[BLOCK_HEADER_SIZE..]
    }

    /// Shrink the payload to the `used` bytes the engine actually wrote.
    pub fn commit_fill(&mut self, used: usize) {
        let used = used.min(self.payload_len());
        self.data.truncate(BLOCK_HEADER_SIZE + used);
    }

    /// Decode the finished reply the way a client would.
    pub fn view(&self) -> ReplyView<'_> {
        if self.data.len() < BLOCK_HEADER_SIZE {
            return ReplyView {
                sort: Sort::Invalid,
                kind: 0,
                payload: &[],
            };
        }
        let (sort, kind) = super::split_tag(self.data[4]);
        let len = read_u32_le(&self.data[..4]) as usize;
        let end = (BLOCK_HEADER_SIZE + len).min(self.data.len());
        ReplyView {
            sort: Sort::from_u8(sort).unwrap_or(Sort::Invalid),
            kind,
            payload: &self.data[BLOCK_HEADER_SIZE..end],
        }
    }
}

/// A client's-eye view of a finished reply block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyView<'a> {
    pub sort: Sort,
    pub kind: u8,
    pub payload: &'a [u8],
}

impl<'a> ReplyView<'a> {
    /// True when the block carries an error message.
    pub fn is_error(&self) -> bool {
        self.sort == Sort::Error
    }

    /// The payload as UTF-8, with invalid sequences replaced.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(self.payload).into_owned()
    }
}
