//! Request decoding: header fields, block iteration, argument views.

use super::{
    read_u32_le, Kind, Sort, WireError, BLOCK_HEADER_SIZE, HEADER_SIZE, MAX_ARGUMENTS,
};

/// The three header fields that prefix every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Total payload length claimed by the client
    pub payload_len: u32,
    /// Capacity the client reserved for the reply
    pub reply_capacity: u32,
    /// Connection slot the request addresses
    pub slot_index: u32,
}

impl RequestHeader {
    /// Decode the 15-byte header: three u32 little-endian fields, each
    /// followed by one reserved byte.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::Truncated { offset: buf.len() });
        }
        Ok(Self {
            payload_len: read_u32_le(&buf[0..]),
            reply_capacity: read_u32_le(&buf[5..]),
            slot_index: read_u32_le(&buf[10..]),
        })
    }
}

/// One decoded request block. The `text` slice always views the raw
/// payload; numeric kinds additionally carry their parsed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Argument<'a> {
    /// A byte-string value
    Str(&'a [u8]),
    /// An integer value with its original rendering
    Int { text: &'a [u8], value: i64 },
    /// A double value with its original rendering
    Double { text: &'a [u8], value: f64 },
}

impl<'a> Argument<'a> {
    /// The raw payload bytes, whatever the kind.
    pub fn bytes(&self) -> &'a [u8] {
        match self {
            Argument::Str(b) => b,
            Argument::Int { text, .. } => text,
            Argument::Double { text, .. } => text,
        }
    }

    /// The payload as UTF-8, with invalid sequences replaced.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(self.bytes()).into_owned()
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    /// True when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }
}

/// A decoded block before argument conversion.
#[derive(Debug, Clone, Copy)]
pub struct Block<'a> {
    pub sort: Sort,
    pub kind: u8,
    pub payload: &'a [u8],
}

/// Cursor over a request's block stream.
///
/// The reader borrows the request buffer; decoded arguments are views
/// into it and stay valid for the life of the call frame.
pub struct RequestReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> RequestReader<'a> {
    /// Start reading at the first block, right behind the header.
    pub fn new(buf: &'a [u8]) -> Result<(RequestHeader, Self), WireError> {
        let header = RequestHeader::decode(buf)?;
        Ok((
            header,
            Self {
                buf,
                offset: HEADER_SIZE,
            },
        ))
    }

    /// Start reading a bare block stream with no request header.
    pub fn without_header(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Current cursor position.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Decode the next block and advance the cursor past it.
    ///
    /// The tag byte sits after the length field; a status-sorted block
    /// consumes no payload no matter what its length field says. Sorts
    /// outside the valid set normalize to `Sort::Invalid` and are
    /// otherwise decoded normally.
    pub fn next_block(&mut self) -> Result<Block<'a>, WireError> {
        if self.offset + BLOCK_HEADER_SIZE > self.buf.len() {
            return Err(WireError::Truncated { offset: self.offset });
        }
        let tag = self.buf[self.offset + 4];
        let sort = Sort::normalize(tag / 20);
        let kind = tag % 20;
        let len = if sort == Sort::Status {
            0
        } else {
            read_u32_le(&self.buf[self.offset..]) as usize
        };
        self.offset += BLOCK_HEADER_SIZE;
        if self.offset + len > self.buf.len() {
            return Err(WireError::Truncated { offset: self.offset });
        }
        let payload = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(Block { sort, kind, payload })
    }

    /// Decode blocks into arguments until end-of-data.
    ///
    /// The stream stops at the EOD block or after `MAX_ARGUMENTS`
    /// arguments, whichever comes first; anything past the cap is left
    /// unread.
    pub fn read_arguments(&mut self) -> Result<Vec<Argument<'a>>, WireError> {
        let mut args = Vec::new();
        while args.len() < MAX_ARGUMENTS {
            let block = self.next_block()?;
            if block.sort == Sort::Eod {
                break;
            }
            args.push(convert_argument(args.len(), block)?);
        }
        Ok(args)
    }
}

/// Turn a block into an argument, parsing numeric payloads.
fn convert_argument<'a>(index: usize, block: Block<'a>) -> Result<Argument<'a>, WireError> {
    match Kind::from_u8(block.kind) {
        Some(Kind::Int) | Some(Kind::Int64) => {
            let value = ascii_i64(block.payload).ok_or(WireError::BadNumber { index })?;
            Ok(Argument::Int {
                text: block.payload,
                value,
            })
        }
        Some(Kind::Double) => {
            let value = ascii_f64(block.payload).ok_or(WireError::BadNumber { index })?;
            Ok(Argument::Double {
                text: block.payload,
                value,
            })
        }
        _ => Ok(Argument::Str(block.payload)),
    }
}

fn ascii_i64(payload: &[u8]) -> Option<i64> {
    std::str::from_utf8(payload).ok()?.trim().parse::<i64>().ok()
}

fn ascii_f64(payload: &[u8]) -> Option<f64> {
    let value = std::str::from_utf8(payload).ok()?.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

/// Client-side request composer.
///
/// Lays down the 15-byte header, then argument blocks, then the
/// end-of-data block; `finish` patches the real payload length back into
/// the header.
pub struct RequestBuilder {
    buf: Vec<u8>,
}

impl RequestBuilder {
    /// Start a request addressed to `slot`, asking for `reply_capacity`
    /// bytes of reply space.
    pub fn new(slot: u32, reply_capacity: u32) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&[0u8; 5]);
        buf.extend_from_slice(&reply_capacity.to_le_bytes());
        buf.push(0);
        buf.extend_from_slice(&slot.to_le_bytes());
        buf.push(0);
        Self { buf }
    }

    fn block(mut self, sort: Sort, kind: Kind, payload: &[u8]) -> Self {
        self.buf
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.push(super::pack_tag(sort, kind));
        self.buf.extend_from_slice(payload);
        self
    }

    /// Append a byte-string argument.
    pub fn str_arg(self, payload: &[u8]) -> Self {
        self.block(Sort::Data, Kind::StrB, payload)
    }

    /// Append an integer argument rendered as ASCII decimal.
    pub fn int_arg(self, value: i64) -> Self {
        self.block(Sort::Data, Kind::Int64, value.to_string().as_bytes())
    }

    /// Append a double argument rendered as ASCII decimal.
    pub fn double_arg(self, value: f64) -> Self {
        self.block(Sort::Data, Kind::Double, value.to_string().as_bytes())
    }

    /// Append a raw block with an explicit sort and kind.
    pub fn tagged_arg(self, sort: Sort, kind: Kind, payload: &[u8]) -> Self {
        self.block(sort, kind, payload)
    }

    /// Terminate the stream and return the wire bytes.
    pub fn finish(self) -> Vec<u8> {
        let mut done = self.block(Sort::Eod, Kind::None, &[]);
        let total = (done.buf.len() - HEADER_SIZE) as u32;
        done.buf[..4].copy_from_slice(&total.to_le_bytes());
        done.buf
    }
}
