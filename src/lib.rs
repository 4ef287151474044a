//! mlink - In-Process Adapter for Hierarchical Databases
//!
//! Embeds InterSystems Cache/IRIS or YottaDB in a host process and
//! drives either engine through one block-framed wire protocol. The
//! engine's own shared library is loaded at open time and spoken to
//! natively: the Cache/IRIS callin interface pushes arguments onto an
//! engine stack and pops results; the YottaDB simple API exchanges
//! buffer vectors. Callers see neither — every operation is a request
//! buffer in and a single data or error block out.
//!
//! # Features
//!
//! - **One wire protocol**: 15-byte header plus tagged blocks, identical
//!   framing for every engine and operation
//! - **Two engine families**: Cache/IRIS (push/pop callin) and YottaDB
//!   (buffer-vector simple API), selected per connection
//! - **32-slot registry**: generation-stamped connection handles behind
//!   a fixed table
//! - **Capability gating**: operations an engine or library build cannot
//!   serve are refused before the foreign boundary
//! - **Reentrant per-connection lock**: foreign-call sections serialize
//!   per connection and may nest
//! - **Call tracing**: per-connection trace of engine calls to stderr,
//!   stdout, or a file
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  Host runtime        │  request buffer in, reply buffer out
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │  Hub                 │  header → slot → gate → lock → driver
//! └──────────┬───────────┘
//!            │
//!      ┌─────┴─────┐
//!      ▼           ▼
//! ┌─────────┐ ┌─────────┐
//! │ Isc     │ │ Ydb     │  per-family drivers over resolved C entry
//! │ driver  │ │ driver  │  points (libloading)
//! └────┬────┘ └────┬────┘
//!      ▼           ▼
//!  libirisdb/  libyottadb
//!  libcache
//! ```
//!
//! # Example
//!
//! Framing a request and reading it back needs no engine:
//!
//! ```rust
//! use mlink::protocol::{RequestBuilder, RequestReader};
//!
//! let request = RequestBuilder::new(0, 256)
//!     .str_arg(b"^inventory")
//!     .str_arg(b"widgets")
//!     .str_arg(b"32")
//!     .finish();
//!
//! let (header, mut reader) = RequestReader::new(&request).unwrap();
//! assert_eq!(header.slot_index, 0);
//! let args = reader.read_arguments().unwrap();
//! assert_eq!(args[1].bytes(), b"widgets");
//! ```
//!
//! Driving a real engine goes through the process-wide [`hub::Hub`]:
//!
//! ```rust,no_run
//! use mlink::hub::{Hub, Op};
//! use mlink::protocol::{ReplyBuffer, RequestBuilder, DEFAULT_REPLY_CAPACITY};
//!
//! let open = RequestBuilder::new(0, DEFAULT_REPLY_CAPACITY as u32)
//!     .str_arg(b"yottadb")
//!     .str_arg(b"/usr/local/lib/yottadb/r202")
//!     .finish();
//! let mut reply = ReplyBuffer::with_capacity(DEFAULT_REPLY_CAPACITY);
//! Hub::global().execute(Op::Open, &open, &mut reply);
//! assert_eq!(reply.view().payload, b"1");
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod driver;
pub mod error;
pub mod ffi;
pub mod hub;
pub mod lock;
pub mod protocol;
pub mod registry;
pub mod trace;

// Re-export commonly used types
pub use config::{ConfigError, ConfigResult, MlinkConfig, ProfileConfig};
pub use driver::{Driver, EngineKind, OpenProfile, Session};
pub use error::{canonical_text, status, stored_code, DbError};
pub use ffi::{EngineLibrary, FfiError};
pub use hub::{Hub, Op};
pub use lock::ReentrantLock;
pub use protocol::{
    Argument, Kind, ReplyBuffer, ReplyView, RequestBuilder, RequestHeader, RequestReader, Sort,
    WireError, DEFAULT_REPLY_CAPACITY, INVALID_SLOT, MAX_ARGUMENTS, MAX_CONNECTIONS,
};
pub use registry::{Connection, EngineVersion, Registry, SlotId};
pub use trace::Trace;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
