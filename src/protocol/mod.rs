//! Wire Protocol Codec
//!
//! Binary request/reply framing shared by every database operation.
//!
//! # Request layout
//!
//! ```text
//! ┌───────────────────────┬─────────────┬─────────────┬───┬──────┐
//! │  Header (15 bytes)    │  Block 0    │  Block 1    │ … │ EOD  │
//! └───────────────────────┴─────────────┴─────────────┴───┴──────┘
//! ```
//!
//! The header is three 5-byte fields, each a 4-byte little-endian `u32`
//! followed by one reserved byte: total payload length, reply buffer
//! capacity, connection slot index.
//!
//! # Block layout
//!
//! ```text
//! ┌──────────────────────┬──────────────────┬──────────────┐
//! │  Length (u32 LE)     │  Tag (1 byte)    │  Payload     │
//! └──────────────────────┴──────────────────┴──────────────┘
//! ```
//!
//! The tag byte packs two values: `sort * 20 + kind`. Sorts classify the
//! block's role in the stream (global name, subscript, data, end-of-data);
//! kinds describe the payload's value type. A status-sorted block carries
//! no payload regardless of its length field.
//!
//! A reply is a single block whose five header bytes live at offset 0 of
//! the reply buffer; the payload follows at offset 5 and the header is
//! rewritten once the payload is complete.

mod reply;
mod request;

pub use reply::{ReplyBuffer, ReplyView};
pub use request::{Argument, Block, RequestBuilder, RequestHeader, RequestReader};

/// Maximum connection slots in the registry.
pub const MAX_CONNECTIONS: usize = 32;

/// Maximum decoded arguments per request, global name included.
pub const MAX_ARGUMENTS: usize = 64;

/// Longest value pushed as a short string; anything larger goes through
/// the engine's extended string cells.
pub const MAX_SHORT_STRING: usize = 32767;

/// Default reply buffer allocation when the header asks for nothing.
pub const DEFAULT_REPLY_CAPACITY: usize = 32768;

/// Bytes consumed by a request header.
pub const HEADER_SIZE: usize = 15;

/// Bytes occupied by a block's length field and tag.
pub const BLOCK_HEADER_SIZE: usize = 5;

/// Sentinel returned by operations addressed to a vacant slot.
pub const INVALID_SLOT: i32 = -3;

/// Block sort: the role a block plays in a request or reply stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Sort {
    /// Unrecognized sort, normalized from any tag outside the valid set
    Invalid = 0,
    /// A data value (node value, operation result)
    Data = 1,
    /// A subscript in a global reference
    Subscript = 2,
    /// A global name, the first block of a reference
    Global = 3,
    /// End of data; terminates the argument stream
    Eod = 9,
    /// Status marker; carries no payload
    Status = 10,
    /// An error message (replies only)
    Error = 11,
}

impl Sort {
    /// Convert from u8, returning None for values outside the enum
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Sort::Invalid),
            1 => Some(Sort::Data),
            2 => Some(Sort::Subscript),
            3 => Some(Sort::Global),
            9 => Some(Sort::Eod),
            10 => Some(Sort::Status),
            11 => Some(Sort::Error),
            _ => None,
        }
    }

    /// Normalize a decoded request sort: anything outside the valid
    /// request set collapses to `Invalid` rather than erroring.
    pub fn normalize(val: u8) -> Self {
        match val {
            1 => Sort::Data,
            2 => Sort::Subscript,
            3 => Sort::Global,
            9 => Sort::Eod,
            10 => Sort::Status,
            _ => Sort::Invalid,
        }
    }
}

/// Payload value kind carried in the low part of the tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    /// No payload type
    None = 0,
    /// Counted byte string (the usual kind for every client value)
    StrB = 1,
    /// C string
    Str = 2,
    /// 32-bit integer rendered as ASCII decimal
    Int = 4,
    /// 64-bit integer rendered as ASCII decimal
    Int64 = 5,
    /// Double rendered as ASCII decimal
    Double = 6,
    /// Object reference handle
    Oref = 7,
    /// Explicit null
    Null = 10,
}

impl Kind {
    /// Convert from u8, returning None for values outside the enum
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Kind::None),
            1 => Some(Kind::StrB),
            2 => Some(Kind::Str),
            4 => Some(Kind::Int),
            5 => Some(Kind::Int64),
            6 => Some(Kind::Double),
            7 => Some(Kind::Oref),
            10 => Some(Kind::Null),
            _ => None,
        }
    }
}

/// Pack a sort and kind into a tag byte.
#[inline]
pub fn pack_tag(sort: Sort, kind: Kind) -> u8 {
    (sort as u8) * 20 + (kind as u8)
}

/// Split a tag byte into its raw sort and kind components.
#[inline]
pub fn split_tag(tag: u8) -> (u8, u8) {
    (tag / 20, tag % 20)
}

/// Read a little-endian u32 from the first four bytes of `buf`.
#[inline]
pub fn read_u32_le(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Write `val` little-endian into the first four bytes of `buf`.
#[inline]
pub fn write_u32_le(buf: &mut [u8], val: u32) {
    buf[..4].copy_from_slice(&val.to_le_bytes());
}

/// A wire-protocol violation. Decoding stops at the first violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The buffer ended inside a header or block
    #[error("request truncated at byte {offset}")]
    Truncated {
        /// Byte offset where the read ran out
        offset: usize,
    },
    /// A numeric-kinded block held a payload that does not parse
    #[error("invalid numeric payload in argument {index}")]
    BadNumber {
        /// Zero-based argument index
        index: usize,
    },
}
