//! Operation hub.
//!
//! One entry point per wire operation, all funnelled through [`Hub`]:
//! decode the request header, find the addressed slot, refuse what the
//! engine cannot do, take the connection lock, drive the engine, frame
//! the reply.
//!
//! ```text
//!   request ──► header ──► slot ──► gate ──► lock ──► driver
//!                                                       │
//!   reply   ◄── data block / error block ◄──────────────┘
//! ```
//!
//! A vacant slot answers with the invalid-slot sentinel and leaves the
//! reply buffer untouched. Everything else answers on the buffer: a
//! single data block on success, a single error block on failure (any
//! partial payload is discarded first, so a reply always decodes as one
//! clean block).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::driver::{
    leading_i32, EngineKind, IscSession, OpenProfile, Session, YdbSession, CODE_UNAVAILABLE,
    CODE_UNRESOLVED, MISSING_PATH, UNKNOWN_ENGINE,
};
use crate::driver::{functions_refusal, namespace_refusal, objects_refusal};
use crate::error::{canonical_text, status, DbError};
use crate::protocol::{
    Argument, Kind, ReplyBuffer, RequestReader, Sort, INVALID_SLOT, MAX_CONNECTIONS,
};
use crate::registry::{Connection, Registry, DUPLICATE_CONNECTION};
use crate::trace::Trace;

/// Name the version banner reports for this library.
#[cfg(windows)]
const LIBRARY_NAME: &str = "mlink.dll";
#[cfg(not(windows))]
const LIBRARY_NAME: &str = "mlink.so";

static HUB: Lazy<Hub> = Lazy::new(Hub::new);

/// Every operation the wire surface can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Version,
    Open,
    Close,
    Set,
    Get,
    Next,
    Previous,
    Delete,
    Defined,
    Increment,
    Function,
    ClassMethod,
    Method,
    GetProperty,
    SetProperty,
    CloseInstance,
    GetNamespace,
    SetNamespace,
    Sleep,
    Benchmark,
}

impl Op {
    /// Parse an operation name as the wire surface and the CLI spell it.
    pub fn from_name(name: &str) -> Option<Op> {
        let op = match name.to_ascii_lowercase().as_str() {
            "version" => Op::Version,
            "open" => Op::Open,
            "close" => Op::Close,
            "set" => Op::Set,
            "get" => Op::Get,
            "next" => Op::Next,
            "previous" => Op::Previous,
            "delete" => Op::Delete,
            "defined" => Op::Defined,
            "increment" => Op::Increment,
            "function" => Op::Function,
            "classmethod" => Op::ClassMethod,
            "method" => Op::Method,
            "getproperty" => Op::GetProperty,
            "setproperty" => Op::SetProperty,
            "closeinstance" => Op::CloseInstance,
            "getnamespace" => Op::GetNamespace,
            "setnamespace" => Op::SetNamespace,
            "sleep" => Op::Sleep,
            "benchmark" => Op::Benchmark,
            _ => return None,
        };
        Some(op)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Version => "version",
            Op::Open => "open",
            Op::Close => "close",
            Op::Set => "set",
            Op::Get => "get",
            Op::Next => "next",
            Op::Previous => "previous",
            Op::Delete => "delete",
            Op::Defined => "defined",
            Op::Increment => "increment",
            Op::Function => "function",
            Op::ClassMethod => "classmethod",
            Op::Method => "method",
            Op::GetProperty => "getproperty",
            Op::SetProperty => "setproperty",
            Op::CloseInstance => "closeinstance",
            Op::GetNamespace => "getnamespace",
            Op::SetNamespace => "setnamespace",
            Op::Sleep => "sleep",
            Op::Benchmark => "benchmark",
        }
    }
}

/// The dispatch core: a connection registry and the operation surface
/// that runs against it.
pub struct Hub {
    registry: Registry,
}

impl Hub {
    pub fn new() -> Hub {
        Hub {
            registry: Registry::new(),
        }
    }

    /// The process-wide instance embedding surfaces drive.
    pub fn global() -> &'static Hub {
        &HUB
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run one operation. The request must carry the 15-byte header;
    /// blocks follow for operations that take arguments. Returns 0 with
    /// the outcome framed in `reply`, or the invalid-slot sentinel when
    /// the header is short or names a vacant slot.
    pub fn execute(&self, op: Op, request: &[u8], reply: &mut ReplyBuffer) -> i32 {
        let (header, mut reader) = match RequestReader::new(request) {
            Ok(decoded) => decoded,
            Err(_) => return INVALID_SLOT,
        };

        match op {
            Op::Version => return self.version(header.slot_index, reply),
            Op::Sleep => {
                let millis = reader
                    .read_arguments()
                    .ok()
                    .and_then(|args| args.first().map(argument_millis))
                    .unwrap_or(0);
                return self.sleep(millis);
            }
            Op::Benchmark => {
                let message = reader
                    .read_arguments()
                    .ok()
                    .and_then(|args| args.first().map(|arg| arg.bytes()))
                    .unwrap_or(&[]);
                return self.benchmark(message, reply);
            }
            Op::Open => return self.open(header.slot_index, &mut reader, reply),
            Op::Close => return self.close(header.slot_index, reply),
            _ => {}
        }

        let conn = match self.registry.lease(header.slot_index) {
            Some(conn) => conn,
            None => return INVALID_SLOT,
        };
        conn.trace().log(op.name());

        if let Err(refusal) = gate(op, &conn) {
            return self.fail(Some(&conn), reply, &refusal);
        }

        let _held = conn.lock().acquire();
        let args = match reader.read_arguments() {
            Ok(args) => args,
            Err(err) => {
                conn.trace().log(&err.to_string());
                return self.fail(Some(&conn), reply, &DbError::from(err));
            }
        };

        match dispatch(op, &conn, &args, reply) {
            Ok(()) => {
                conn.clear_error();
                0
            }
            Err(err) => self.fail(Some(&conn), reply, &err),
        }
    }

    /// Write the version banner. With a connection in the slot the
    /// banner gains the engine's product and version and goes out as a
    /// data block; with no connection it goes out raw, so the surface
    /// works before any open.
    pub fn version(&self, index: u32, reply: &mut ReplyBuffer) -> i32 {
        let mut banner = format!("{}:{}", LIBRARY_NAME, env!("CARGO_PKG_VERSION"));
        match self.registry.lease(index) {
            Some(conn) => {
                if let Some(version) = conn.version() {
                    banner.push_str("; ");
                    banner.push_str(version.product.banner_label());
                    banner.push(':');
                    banner.push_str(&version.text);
                }
                reply.set_value(Sort::Data, Kind::StrB, banner.as_bytes());
            }
            None => reply.set_raw(banner.as_bytes()),
        }
        0
    }

    pub fn sleep(&self, period_ms: i64) -> i32 {
        if period_ms > 0 {
            thread::sleep(Duration::from_millis(period_ms as u64));
        }
        0
    }

    /// Echo the message straight back, no framing. A loopback for
    /// callers measuring the cost of the boundary itself.
    pub fn benchmark(&self, message: &[u8], reply: &mut ReplyBuffer) -> i32 {
        reply.set_raw(message);
        0
    }

    fn open(&self, index: u32, reader: &mut RequestReader<'_>, reply: &mut ReplyBuffer) -> i32 {
        if index as usize >= MAX_CONNECTIONS {
            return self.fail(None, reply, &DbError::Native(status::NO_CONNECTION));
        }
        if self.registry.lease(index).is_some() {
            let dup = DbError::preset(status::OPEN_ERROR, DUPLICATE_CONNECTION);
            return self.fail(None, reply, &dup);
        }

        let args = match reader.read_arguments() {
            Ok(args) => args,
            Err(err) => return self.fail(None, reply, &DbError::from(err)),
        };
        let profile = OpenProfile::from_arguments(&args);
        let kind = match profile.kind() {
            Some(kind) => kind,
            None => {
                let err = DbError::preset(status::NO_CONNECTION, UNKNOWN_ENGINE);
                return self.fail(None, reply, &err);
            }
        };
        if profile.path.is_empty() {
            let err = DbError::preset(status::NO_CONNECTION, MISSING_PATH);
            return self.fail(None, reply, &err);
        }
        profile.apply_environment();

        let trace = Trace::from_spec(&profile.debug);
        trace.log("open");

        let opened = match kind {
            EngineKind::YottaDb => YdbSession::open(&profile, &trace)
                .map(|(session, version)| (Session::Ydb(session), version)),
            EngineKind::Cache | EngineKind::Iris => IscSession::open(kind, &profile, &trace)
                .map(|(session, version)| (Session::Isc(session), version)),
        };
        let (session, version) = match opened {
            Ok(opened) => opened,
            Err(err) => return self.fail(None, reply, &err),
        };

        let conn = Arc::new(Connection::new(kind, profile, session, version, trace));
        conn.session()
            .finish_open(conn.lock(), &conn.profile().namespace);

        if let Err(err) = self.registry.claim(index, Arc::clone(&conn)) {
            conn.session().driver().shutdown();
            return self.fail(None, reply, &err);
        }

        reply.set_value(Sort::Data, Kind::StrB, b"1");
        0
    }

    /// Vacate the slot, shut the engine down, report `"1"` regardless
    /// of what the shutdown said.
    fn close(&self, index: u32, reply: &mut ReplyBuffer) -> i32 {
        let conn = match self.registry.release(index) {
            Some(conn) => conn,
            None => return INVALID_SLOT,
        };
        conn.trace().log("close");
        {
            let _held = conn.lock().acquire();
            conn.session().driver().shutdown();
        }
        reply.set_value(Sort::Data, Kind::StrB, b"1");
        0
    }

    /// Record the failure on the connection and frame it as the reply's
    /// single error block. A pre-set message survives as written; a bare
    /// native status translates through the engine's message machinery,
    /// or the canonical table when no connection exists yet.
    fn fail(&self, conn: Option<&Connection>, reply: &mut ReplyBuffer, err: &DbError) -> i32 {
        let text = match err {
            DbError::Preset { text, .. } => text.clone(),
            DbError::Native(code) => match conn {
                Some(conn) => conn.session().driver().error_text(*code),
                None => canonical_text(*code).to_string(),
            },
        };
        if let Some(conn) = conn {
            conn.set_error(err.code(), &text);
        }
        reply.reset();
        reply.append(text.as_bytes());
        reply.finish(Sort::Error, Kind::StrB);
        0
    }
}

impl Default for Hub {
    fn default() -> Self {
        Hub::new()
    }
}

/// Refuse operations the connection's engine family or loaded library
/// cannot serve. Runs before the lock is taken; a refused operation
/// never reaches the foreign boundary.
fn gate(op: Op, conn: &Connection) -> Result<(), DbError> {
    match op {
        Op::Function => {
            if conn.kind().is_isc() && !conn.session().functions_enabled() {
                return Err(functions_refusal());
            }
        }
        Op::ClassMethod | Op::Method | Op::GetProperty | Op::SetProperty | Op::CloseInstance => {
            if !conn.kind().is_isc() || !conn.session().objects_enabled() {
                return Err(objects_refusal());
            }
        }
        Op::GetNamespace | Op::SetNamespace => {
            if !conn.kind().is_isc() {
                return Err(namespace_refusal(CODE_UNAVAILABLE));
            }
            if !conn.session().namespace_enabled(op == Op::SetNamespace) {
                return Err(namespace_refusal(CODE_UNRESOLVED));
            }
        }
        _ => {}
    }
    Ok(())
}

fn dispatch(
    op: Op,
    conn: &Connection,
    args: &[Argument<'_>],
    reply: &mut ReplyBuffer,
) -> Result<(), DbError> {
    let driver = conn.session().driver();
    match op {
        Op::Set => driver.global_set(args, reply),
        Op::Get => driver.global_get(args, reply),
        Op::Next => driver.global_next(args, reply),
        Op::Previous => driver.global_previous(args, reply),
        Op::Delete => driver.global_delete(args, reply),
        Op::Defined => driver.global_defined(args, reply),
        Op::Increment => driver.global_increment(args, reply),
        Op::Function => driver.call_function(args, reply),
        Op::ClassMethod => driver.class_method(args, reply),
        Op::Method => driver.instance_method(args, reply),
        Op::GetProperty => driver.get_property(args, reply),
        Op::SetProperty => driver.set_property(args, reply),
        Op::CloseInstance => driver.close_instance(args, reply),
        Op::GetNamespace => driver.get_namespace(reply),
        Op::SetNamespace => driver.set_namespace(conn.lock(), args, reply),
        // The rest route through their own entry points before dispatch.
        Op::Version | Op::Open | Op::Close | Op::Sleep | Op::Benchmark => Ok(()),
    }
}

fn argument_millis(arg: &Argument<'_>) -> i64 {
    match arg {
        Argument::Int { value, .. } => *value,
        Argument::Double { value, .. } => *value as i64,
        Argument::Str(text) => leading_i32(&String::from_utf8_lossy(text)) as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::stub::StubSession;
    use crate::driver::{
        FUNCTIONS_UNAVAILABLE, NAMESPACE_UNAVAILABLE, OBJECTS_UNAVAILABLE,
    };
    use crate::protocol::RequestBuilder;
    use crate::registry::EngineVersion;

    fn claim_stub(hub: &Hub, index: u32, kind: EngineKind, session: StubSession) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(
            kind,
            OpenProfile::default(),
            Session::Stub(session),
            None,
            Trace::disabled(),
        ));
        hub.registry().claim(index, Arc::clone(&conn)).unwrap();
        conn
    }

    fn request(slot: u32, args: &[&[u8]]) -> Vec<u8> {
        let mut builder = RequestBuilder::new(slot, 256);
        for arg in args {
            builder = builder.str_arg(arg);
        }
        builder.finish()
    }

    fn stub_of(conn: &Connection) -> &StubSession {
        match conn.session() {
            Session::Stub(session) => session,
            _ => panic!("expected a stub session"),
        }
    }

    #[test]
    fn test_op_names_round_trip() {
        for name in [
            "version",
            "open",
            "close",
            "set",
            "get",
            "next",
            "previous",
            "delete",
            "defined",
            "increment",
            "function",
            "classmethod",
            "method",
            "getproperty",
            "setproperty",
            "closeinstance",
            "getnamespace",
            "setnamespace",
            "sleep",
            "benchmark",
        ] {
            let op = Op::from_name(name).unwrap();
            assert_eq!(op.name(), name);
        }
        assert_eq!(Op::from_name("GET"), Some(Op::Get));
        assert_eq!(Op::from_name("merge"), None);
    }

    #[test]
    fn test_vacant_slot_leaves_reply_untouched() {
        let hub = Hub::new();
        let mut reply = ReplyBuffer::with_capacity(64);
        let rc = hub.execute(Op::Get, &request(3, &[b"^x"]), &mut reply);
        assert_eq!(rc, INVALID_SLOT);
        assert_eq!(reply.payload_len(), 0);
        assert_eq!(reply.as_bytes(), &[0u8; 5]);
    }

    #[test]
    fn test_short_request_is_refused() {
        let hub = Hub::new();
        let mut reply = ReplyBuffer::with_capacity(64);
        assert_eq!(hub.execute(Op::Get, b"abc", &mut reply), INVALID_SLOT);
    }

    #[test]
    fn test_set_then_get() {
        let hub = Hub::new();
        claim_stub(&hub, 2, EngineKind::YottaDb, StubSession::new());

        let mut reply = ReplyBuffer::with_capacity(256);
        let rc = hub.execute(Op::Set, &request(2, &[b"^towns", b"md", b"aberdeen"]), &mut reply);
        assert_eq!(rc, 0);
        assert_eq!(reply.view().payload, b"0");

        let mut reply = ReplyBuffer::with_capacity(256);
        hub.execute(Op::Get, &request(2, &[b"^towns", b"md"]), &mut reply);
        let view = reply.view();
        assert!(!view.is_error());
        assert_eq!(view.payload, b"aberdeen");
    }

    #[test]
    fn test_get_of_missing_node_is_empty_data() {
        let hub = Hub::new();
        claim_stub(&hub, 0, EngineKind::YottaDb, StubSession::new());
        let mut reply = ReplyBuffer::with_capacity(64);
        assert_eq!(hub.execute(Op::Get, &request(0, &[b"^nope"]), &mut reply), 0);
        let view = reply.view();
        assert_eq!(view.sort, Sort::Data);
        assert!(view.payload.is_empty());
    }

    #[test]
    fn test_error_replaces_reply_and_sticks_to_connection() {
        let hub = Hub::new();
        let conn = claim_stub(&hub, 1, EngineKind::YottaDb, StubSession::new());
        let mut reply = ReplyBuffer::with_capacity(128);
        // No ^ separator in the reference.
        hub.execute(Op::Function, &request(1, &[b"noseparator", b"a"]), &mut reply);
        let view = reply.view();
        assert!(view.is_error());
        assert_eq!(view.payload, b"Invalid function name");
        let (code, text) = conn.last_error();
        assert_eq!(code, 1004);
        assert_eq!(text, "Invalid function name");

        // The next success clears the sticky error.
        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(Op::Set, &request(1, &[b"^a", b"1"]), &mut reply);
        assert_eq!(conn.last_error(), (0, String::new()));
    }

    #[test]
    fn test_object_ops_refused_for_engine_b() {
        let hub = Hub::new();
        let conn = claim_stub(&hub, 4, EngineKind::YottaDb, StubSession::new());
        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(Op::ClassMethod, &request(4, &[b"%Library.Date", b"Now"]), &mut reply);
        assert!(reply.view().is_error());
        assert_eq!(reply.view().payload, OBJECTS_UNAVAILABLE.as_bytes());
        assert_eq!(conn.last_error().0, 2020);
        // Refused before the stub saw anything.
        assert!(stub_of(&conn).calls().is_empty());
    }

    #[test]
    fn test_function_gate_follows_library_capability() {
        let hub = Hub::new();
        claim_stub(
            &hub,
            0,
            EngineKind::Cache,
            StubSession::new().without_functions(),
        );
        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(Op::Function, &request(0, &[b"sum^math", b"2", b"3"]), &mut reply);
        assert!(reply.view().is_error());
        assert_eq!(reply.view().payload, FUNCTIONS_UNAVAILABLE.as_bytes());

        let hub = Hub::new();
        claim_stub(&hub, 0, EngineKind::Cache, StubSession::new());
        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(Op::Function, &request(0, &[b"sum^math", b"2", b"3"]), &mut reply);
        assert!(!reply.view().is_error());
        assert_eq!(reply.view().payload, b"sum:2");
    }

    #[test]
    fn test_namespace_refusal_codes() {
        let hub = Hub::new();
        let conn = claim_stub(&hub, 0, EngineKind::YottaDb, StubSession::new());
        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(Op::GetNamespace, &request(0, &[]), &mut reply);
        assert_eq!(reply.view().payload, NAMESPACE_UNAVAILABLE.as_bytes());
        assert_eq!(conn.last_error().0, 2020);

        let hub = Hub::new();
        let conn = claim_stub(
            &hub,
            0,
            EngineKind::Iris,
            StubSession::new().without_namespace(),
        );
        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(Op::SetNamespace, &request(0, &[b"USER"]), &mut reply);
        assert_eq!(reply.view().payload, NAMESPACE_UNAVAILABLE.as_bytes());
        assert_eq!(conn.last_error().0, 4020);
    }

    #[test]
    fn test_namespace_change_reenters_the_held_lock() {
        let hub = Hub::new();
        let conn = claim_stub(&hub, 0, EngineKind::Cache, StubSession::new());
        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(Op::SetNamespace, &request(0, &[b"%SYS"]), &mut reply);
        assert!(!reply.view().is_error());
        assert_eq!(reply.view().payload, b"%SYS");
        // The helper re-acquired under the hub's hold.
        assert!(stub_of(&conn)
            .calls()
            .contains(&"setnamespace@depth2".to_string()));
        // Fully released afterwards.
        assert_eq!(conn.lock().depth(), 0);
    }

    #[test]
    fn test_version_banner_raw_when_vacant() {
        let hub = Hub::new();
        let mut reply = ReplyBuffer::with_capacity(128);
        assert_eq!(hub.version(7, &mut reply), 0);
        let banner = reply.as_bytes().to_vec();
        // Raw bytes: the banner text starts at offset 0, no block header.
        assert!(banner.starts_with(format!("{}:", LIBRARY_NAME).as_bytes()));
        assert!(String::from_utf8(banner)
            .unwrap()
            .contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_version_banner_framed_with_engine_suffix() {
        let hub = Hub::new();
        let conn = Arc::new(Connection::new(
            EngineKind::YottaDb,
            OpenProfile::default(),
            Session::Stub(StubSession::new()),
            Some(EngineVersion {
                product: EngineKind::YottaDb,
                major: 6,
                minor: 3,
                build: 4,
                number: 630004,
                text: "6.3.b4".to_string(),
            }),
            Trace::disabled(),
        ));
        hub.registry().claim(5, conn).unwrap();

        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(Op::Version, &request(5, &[]), &mut reply);
        let view = reply.view();
        assert_eq!(view.sort, Sort::Data);
        let text = view.to_text();
        assert!(text.contains("; YottaDB:6.3.b4"), "banner was {}", text);
    }

    #[test]
    fn test_close_vacates_and_shuts_down() {
        let hub = Hub::new();
        let conn = claim_stub(&hub, 6, EngineKind::YottaDb, StubSession::new());
        let mut reply = ReplyBuffer::with_capacity(64);
        assert_eq!(hub.execute(Op::Close, &request(6, &[]), &mut reply), 0);
        assert_eq!(reply.view().payload, b"1");
        assert!(hub.registry().lease(6).is_none());
        assert_eq!(stub_of(&conn).shutdown_count(), 1);

        // A second close finds the slot vacant.
        let mut reply = ReplyBuffer::with_capacity(64);
        assert_eq!(
            hub.execute(Op::Close, &request(6, &[]), &mut reply),
            INVALID_SLOT
        );
    }

    #[test]
    fn test_open_refuses_unknown_engine_and_missing_path() {
        let hub = Hub::new();
        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(Op::Open, &request(0, &[b"postgres", b"/usr/lib"]), &mut reply);
        assert!(reply.view().is_error());
        assert_eq!(reply.view().payload, UNKNOWN_ENGINE.as_bytes());

        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(Op::Open, &request(0, &[b"yottadb"]), &mut reply);
        assert!(reply.view().is_error());
        assert_eq!(reply.view().payload, MISSING_PATH.as_bytes());
    }

    #[test]
    fn test_open_against_occupied_slot_is_refused() {
        let hub = Hub::new();
        let conn = claim_stub(&hub, 3, EngineKind::YottaDb, StubSession::new());
        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(
            Op::Open,
            &request(3, &[b"yottadb", b"/usr/local/lib/yottadb/r202"]),
            &mut reply,
        );
        assert!(reply.view().is_error());
        assert_eq!(reply.view().payload, DUPLICATE_CONNECTION.as_bytes());

        // The occupant still serves.
        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(Op::Set, &request(3, &[b"^still", b"here"]), &mut reply);
        assert!(!reply.view().is_error());
        assert_eq!(stub_of(&conn).calls(), vec!["set".to_string()]);
    }

    #[test]
    fn test_open_refuses_out_of_range_slot() {
        let hub = Hub::new();
        let mut reply = ReplyBuffer::with_capacity(128);
        hub.execute(
            Op::Open,
            &request(MAX_CONNECTIONS as u32, &[b"yottadb", b"/opt/yottadb"]),
            &mut reply,
        );
        assert!(reply.view().is_error());
        assert_eq!(
            reply.view().payload,
            canonical_text(status::NO_CONNECTION).as_bytes()
        );
    }

    #[test]
    fn test_sleep_and_benchmark() {
        let hub = Hub::new();
        assert_eq!(hub.sleep(0), 0);
        assert_eq!(hub.sleep(-5), 0);

        let mut reply = ReplyBuffer::with_capacity(64);
        let req = RequestBuilder::new(0, 64).int_arg(1).finish();
        assert_eq!(hub.execute(Op::Sleep, &req, &mut reply), 0);
        // No block framed.
        assert_eq!(reply.as_bytes(), &[0u8; 5]);

        let mut reply = ReplyBuffer::with_capacity(64);
        assert_eq!(
            hub.execute(Op::Benchmark, &request(0, &[b"ping"]), &mut reply),
            0
        );
        assert_eq!(reply.as_bytes(), b"ping");
    }

    #[test]
    fn test_malformed_numeric_argument_is_a_protocol_error() {
        let hub = Hub::new();
        let conn = claim_stub(&hub, 0, EngineKind::YottaDb, StubSession::new());
        let req = RequestBuilder::new(0, 128)
            .str_arg(b"^counter")
            .tagged_arg(Sort::Data, Kind::Int, b"not-a-number")
            .finish();
        let mut reply = ReplyBuffer::with_capacity(128);
        assert_eq!(hub.execute(Op::Increment, &req, &mut reply), 0);
        assert!(reply.view().is_error());
        assert_eq!(reply.view().payload, b"Invalid string");
        assert_eq!(conn.last_error().0, 1001);
        assert!(stub_of(&conn).calls().is_empty());
    }

    #[test]
    fn test_global_hub_is_one_instance() {
        let first = Hub::global() as *const Hub;
        let second = Hub::global() as *const Hub;
        assert_eq!(first, second);
    }
}
