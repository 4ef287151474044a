//! Engine drivers.
//!
//! The hub speaks one dispatch vocabulary; each engine family answers it
//! through a driver:
//!
//! ```text
//!             +-----------------------+
//!   hub ----> | Driver trait          |
//!             +-----------+-----------+
//!                         |
//!            +------------+------------+
//!            |                         |
//!   IscSession (push/pop API)   YdbSession (buffer-vector API)
//! ```
//!
//! A driver owns the loaded shared library and its resolved entry points.
//! Methods take the decoded argument list and write their result straight
//! into the reply buffer; failures come back as [`DbError`] and the hub
//! turns them into error blocks. Drivers never touch the wire framing
//! beyond the reply value itself.

use crate::error::DbError;
use crate::lock::ReentrantLock;
use crate::protocol::{Argument, ReplyBuffer};

pub mod isc;
pub mod ydb;

#[cfg(test)]
pub mod stub;

pub use isc::IscSession;
pub use ydb::YdbSession;

#[cfg(test)]
pub use stub::StubSession;

/// Opening a connection without a recognizable engine name fails with this.
pub const UNKNOWN_ENGINE: &str = "Unable to determine the database type";

/// Opening a connection without an installation path fails with this.
pub const MISSING_PATH: &str = "Unable to determine the path to the database installation";

pub const FUNCTIONS_UNAVAILABLE: &str = "Cache functions are not available with this platform";
pub const OBJECTS_UNAVAILABLE: &str = "Cache objects are not available with this platform";
pub const NAMESPACE_UNAVAILABLE: &str = "Cache Namespace operations are not available with this platform";

/// Error code for a capability the engine family can never provide.
pub const CODE_UNAVAILABLE: i32 = 2020;

/// Error code for a capability the loaded library build left unresolved.
pub const CODE_UNRESOLVED: i32 = 4020;

/// Device string that maps to a null terminal on this platform.
#[cfg(windows)]
pub const NULL_DEVICE: &str = "//./nul";
#[cfg(not(windows))]
pub const NULL_DEVICE: &str = "/dev/null/";

pub fn functions_refusal() -> DbError {
    DbError::preset(CODE_UNAVAILABLE, FUNCTIONS_UNAVAILABLE)
}

pub fn objects_refusal() -> DbError {
    DbError::preset(CODE_UNAVAILABLE, OBJECTS_UNAVAILABLE)
}

pub fn namespace_refusal(code: i32) -> DbError {
    DbError::preset(code, NAMESPACE_UNAVAILABLE)
}

/// Parse the integer prefix of `text`, stopping at the first byte that
/// is not part of a decimal number. Version banners bury their numbers
/// in prose, so both drivers read them this way.
pub(crate) fn leading_i32(text: &str) -> i32 {
    let trimmed = text.trim_start();
    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1i64, &trimmed[1..]),
        Some(b'+') => (1, &trimmed[1..]),
        _ => (1, trimmed),
    };
    let mut value: i64 = 0;
    for byte in rest.bytes() {
        if !byte.is_ascii_digit() {
            break;
        }
        value = value.saturating_mul(10).saturating_add(i64::from(byte - b'0'));
        if value > i64::from(i32::MAX) {
            break;
        }
    }
    (sign * value).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Split a `label^routine` function reference at its first caret.
pub(crate) fn split_function_reference(reference: &[u8]) -> Option<(&[u8], &[u8])> {
    let idx = reference.iter().position(|&b| b == b'^')?;
    Some((&reference[..idx], &reference[idx + 1..]))
}

/// Parse the decimal prefix of `text`, digits and at most one dot.
pub(crate) fn leading_f64(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let mut seen_dot = false;
    while end < bytes.len() {
        let byte = bytes[end];
        if byte.is_ascii_digit() {
            end += 1;
        } else if byte == b'.' && !seen_dot {
            seen_dot = true;
            end += 1;
        } else {
            break;
        }
    }
    trimmed[..end].parse().unwrap_or(0.0)
}

/// The two engine families the adapter can drive.
///
/// Cache and IRIS share one calling convention and differ only in library
/// names and symbol prefixes, so both sit on the ISC side of the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Cache,
    Iris,
    YottaDb,
}

impl EngineKind {
    pub fn from_name(name: &str) -> Option<EngineKind> {
        if name.eq_ignore_ascii_case("cache") {
            Some(EngineKind::Cache)
        } else if name.eq_ignore_ascii_case("iris") {
            Some(EngineKind::Iris)
        } else if name.eq_ignore_ascii_case("yottadb") {
            Some(EngineKind::YottaDb)
        } else {
            None
        }
    }

    /// Short product name, as used in load-failure messages.
    pub fn product(&self) -> &'static str {
        match self {
            EngineKind::Cache => "Cache",
            EngineKind::Iris => "IRIS",
            EngineKind::YottaDb => "YottaDB",
        }
    }

    /// Long product name, as appended to the version banner.
    pub fn banner_label(&self) -> &'static str {
        match self {
            EngineKind::Cache => "InterSystems Cache",
            EngineKind::Iris => "InterSystems IRIS",
            EngineKind::YottaDb => "YottaDB",
        }
    }

    pub fn is_isc(&self) -> bool {
        !matches!(self, EngineKind::YottaDb)
    }
}

/// Connection parameters, decoded from the open request's argument list.
///
/// Arguments arrive positionally and each one is truncated to the same cap
/// the wire contract has always promised, so an oversized value degrades
/// instead of overflowing.
#[derive(Debug, Clone, Default)]
pub struct OpenProfile {
    pub engine: String,
    pub path: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub input_device: String,
    pub output_device: String,
    pub debug: String,
    pub environment: String,
}

impl OpenProfile {
    pub fn from_arguments(args: &[Argument<'_>]) -> OpenProfile {
        let mut profile = OpenProfile::default();
        for (index, arg) in args.iter().enumerate() {
            profile.assign(index, arg.bytes());
        }
        profile
    }

    /// Store one positional argument, truncated to its field cap.
    pub fn assign(&mut self, index: usize, value: &[u8]) {
        let (field, cap) = match index {
            0 => (&mut self.engine, 30),
            1 => (&mut self.path, 250),
            2 => (&mut self.username, 60),
            3 => (&mut self.password, 60),
            4 => (&mut self.namespace, 60),
            5 => (&mut self.input_device, 60),
            6 => (&mut self.output_device, 60),
            7 => (&mut self.debug, 60),
            8 => (&mut self.environment, 1020),
            _ => return,
        };
        let len = value.len().min(cap);
        *field = String::from_utf8_lossy(&value[..len]).into_owned();
        if index == 0 {
            field.make_ascii_lowercase();
        }
    }

    pub fn kind(&self) -> Option<EngineKind> {
        EngineKind::from_name(&self.engine)
    }

    /// Export the environment block into the process environment.
    ///
    /// The block is a sequence of `name=value` lines. Only lines closed by
    /// a newline count; a closed line without `=` stops the scan, and an
    /// unterminated trailing segment is never applied.
    pub fn apply_environment(&self) {
        let mut rest = self.environment.as_str();
        while let Some(end) = rest.find('\n') {
            let line = &rest[..end];
            rest = &rest[end + 1..];
            match line.split_once('=') {
                Some((name, value)) if !name.is_empty() => std::env::set_var(name, value),
                _ => break,
            }
        }
    }
}

/// One engine connection's operation surface.
///
/// Every method writes its successful result into `reply` and leaves the
/// framing to the caller. `args` is the decoded argument list with the
/// global or class reference first, exactly as it came off the wire.
pub trait Driver {
    fn global_set(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError>;
    fn global_get(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError>;
    fn global_next(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError>;
    fn global_previous(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer)
        -> Result<(), DbError>;
    fn global_delete(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError>;
    fn global_defined(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer)
        -> Result<(), DbError>;
    fn global_increment(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError>;

    fn call_function(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError>;

    fn class_method(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError>;
    fn instance_method(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError>;
    fn get_property(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError>;
    fn set_property(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError>;
    fn close_instance(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer)
        -> Result<(), DbError>;

    fn get_namespace(&self, reply: &mut ReplyBuffer) -> Result<(), DbError>;

    /// Change the namespace. Takes the connection lock because the switch
    /// serializes against in-flight work on its own, even when the caller
    /// already holds the lock for the surrounding operation.
    fn set_namespace(
        &self,
        lock: &ReentrantLock,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError>;

    /// Render the engine's text for a native error code.
    fn error_text(&self, code: i32) -> String;

    /// Detach from the engine. The returned code is only worth tracing.
    fn shutdown(&self) -> i32;
}

/// A live engine session, dispatched by family.
pub enum Session {
    Isc(IscSession),
    Ydb(YdbSession),
    #[cfg(test)]
    Stub(StubSession),
}

impl Session {
    pub fn driver(&self) -> &dyn Driver {
        match self {
            Session::Isc(session) => session,
            Session::Ydb(session) => session,
            #[cfg(test)]
            Session::Stub(session) => session,
        }
    }

    /// Whether the loaded library can run direct function calls.
    pub fn functions_enabled(&self) -> bool {
        match self {
            Session::Isc(session) => session.capabilities().functions,
            Session::Ydb(_) => true,
            #[cfg(test)]
            Session::Stub(session) => session.functions_enabled(),
        }
    }

    /// Whether the loaded library can drive object references.
    pub fn objects_enabled(&self) -> bool {
        match self {
            Session::Isc(session) => session.capabilities().objects,
            Session::Ydb(_) => false,
            #[cfg(test)]
            Session::Stub(session) => session.objects_enabled(),
        }
    }

    /// Whether namespace reads (or writes, with `write`) can reach the
    /// engine through the resolved entry points.
    pub fn namespace_enabled(&self, write: bool) -> bool {
        match self {
            Session::Isc(session) => session.namespace_enabled(write),
            Session::Ydb(_) => false,
            #[cfg(test)]
            Session::Stub(session) => session.namespace_enabled(),
        }
    }

    /// Housekeeping that has to wait until the connection owns its lock:
    /// the initial namespace switch and multi-thread arming.
    pub fn finish_open(&self, lock: &ReentrantLock, namespace: &str) {
        if let Session::Isc(session) = self {
            session.finish_open(lock, namespace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_names() {
        assert_eq!(EngineKind::from_name("cache"), Some(EngineKind::Cache));
        assert_eq!(EngineKind::from_name("IRIS"), Some(EngineKind::Iris));
        assert_eq!(EngineKind::from_name("YottaDB"), Some(EngineKind::YottaDb));
        assert_eq!(EngineKind::from_name("postgres"), None);
        assert_eq!(EngineKind::from_name(""), None);
    }

    #[test]
    fn test_engine_kind_families() {
        assert!(EngineKind::Cache.is_isc());
        assert!(EngineKind::Iris.is_isc());
        assert!(!EngineKind::YottaDb.is_isc());
        assert_eq!(EngineKind::Iris.banner_label(), "InterSystems IRIS");
        assert_eq!(EngineKind::YottaDb.product(), "YottaDB");
    }

    #[test]
    fn test_profile_assignment_order() {
        let mut profile = OpenProfile::default();
        profile.assign(0, b"YottaDB");
        profile.assign(1, b"/usr/local/lib/yottadb/r134");
        profile.assign(2, b"admin");
        profile.assign(3, b"secret");
        profile.assign(4, b"USER");
        profile.assign(5, b"/dev/tty");
        profile.assign(6, b"/dev/tty");
        profile.assign(7, b"trace.log");
        profile.assign(8, b"ydb_gbldir=/tmp/db.gld\n");
        assert_eq!(profile.engine, "yottadb");
        assert_eq!(profile.kind(), Some(EngineKind::YottaDb));
        assert_eq!(profile.path, "/usr/local/lib/yottadb/r134");
        assert_eq!(profile.debug, "trace.log");
        assert_eq!(profile.environment, "ydb_gbldir=/tmp/db.gld\n");
    }

    #[test]
    fn test_profile_caps_truncate() {
        let mut profile = OpenProfile::default();
        let long = vec![b'x'; 400];
        profile.assign(1, &long);
        assert_eq!(profile.path.len(), 250);
        profile.assign(2, &long);
        assert_eq!(profile.username.len(), 60);
        profile.assign(0, &long);
        assert_eq!(profile.engine.len(), 30);
        assert_eq!(profile.kind(), None);
        // Positions past the profile are ignored outright.
        profile.assign(9, b"extra");
        profile.assign(40, b"extra");
    }

    #[test]
    fn test_environment_scan() {
        let mut profile = OpenProfile::default();
        profile.assign(
            8,
            b"MLINK_TEST_ENV_A=alpha\nMLINK_TEST_ENV_B=beta\nMLINK_TEST_ENV_TAIL=never",
        );
        profile.apply_environment();
        assert_eq!(std::env::var("MLINK_TEST_ENV_A").as_deref(), Ok("alpha"));
        assert_eq!(std::env::var("MLINK_TEST_ENV_B").as_deref(), Ok("beta"));
        // The trailing segment has no newline, so it is never applied.
        assert!(std::env::var("MLINK_TEST_ENV_TAIL").is_err());
    }

    #[test]
    fn test_environment_scan_stops_without_separator() {
        let mut profile = OpenProfile::default();
        profile.assign(8, b"not-a-pair\nMLINK_TEST_ENV_AFTER_STOP=x\n");
        profile.apply_environment();
        assert!(std::env::var("MLINK_TEST_ENV_AFTER_STOP").is_err());
    }

    #[test]
    fn test_refusal_presets() {
        let err = functions_refusal();
        assert_eq!(err.code(), CODE_UNAVAILABLE);
        let err = namespace_refusal(CODE_UNRESOLVED);
        assert_eq!(err.code(), CODE_UNRESOLVED);
    }

    #[test]
    fn test_leading_numbers() {
        assert_eq!(leading_i32("215U) Wed Jun 9"), 215);
        assert_eq!(leading_i32("2021.1"), 2021);
        assert_eq!(leading_i32("no digits"), 0);
        assert_eq!(leading_i32("-4 and change"), -4);
        assert_eq!(leading_i32("99999999999999"), i32::MAX);
        assert_eq!(leading_f64("5.2 (Build 329)"), 5.2);
        assert_eq!(leading_f64("2021.1 (Build"), 2021.1);
        assert_eq!(leading_f64("V6.3-004"), 0.0);
        assert_eq!(leading_f64("6.3-004"), 6.3);
    }
}
