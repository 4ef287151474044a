//! The per-slot connection record.

use parking_lot::Mutex;

use crate::driver::{EngineKind, OpenProfile, Session};
use crate::error::stored_code;
use crate::lock::ReentrantLock;
use crate::trace::Trace;

/// Parsed engine version, filled in during open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineVersion {
    /// Product the version text identified, which may refine the open
    /// profile's engine kind (an IRIS library reached through a `cache`
    /// profile still reports IRIS)
    pub product: EngineKind,
    pub major: i32,
    pub minor: i32,
    pub build: i32,
    /// Composite version number, `yymbbbb` style
    pub number: u32,
    /// Display form, `major.minor.b<build>`
    pub text: String,
}

#[derive(Debug, Default)]
struct LastError {
    code: i32,
    text: String,
}

/// One open engine connection.
///
/// Built whole during open and immutable afterwards except for the last
/// error record; dropped on close after the engine shuts down.
pub struct Connection {
    kind: EngineKind,
    profile: OpenProfile,
    session: Session,
    version: Option<EngineVersion>,
    lock: ReentrantLock,
    error: Mutex<LastError>,
    trace: Trace,
}

impl Connection {
    pub fn new(
        kind: EngineKind,
        profile: OpenProfile,
        session: Session,
        version: Option<EngineVersion>,
        trace: Trace,
    ) -> Self {
        Self {
            kind,
            profile,
            session,
            version,
            lock: ReentrantLock::new(),
            error: Mutex::new(LastError::default()),
            trace,
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn profile(&self) -> &OpenProfile {
        &self.profile
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn version(&self) -> Option<&EngineVersion> {
        self.version.as_ref()
    }

    /// The lock serializing this connection's foreign-call sections.
    pub fn lock(&self) -> &ReentrantLock {
        &self.lock
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Record a failure. Negative native codes store in the 900 range.
    pub fn set_error(&self, code: i32, text: &str) {
        let mut cell = self.error.lock();
        cell.code = stored_code(code);
        cell.text = text.to_string();
    }

    pub fn clear_error(&self) {
        let mut cell = self.error.lock();
        cell.code = 0;
        cell.text.clear();
    }

    /// Last stored error code and message.
    pub fn last_error(&self) -> (i32, String) {
        let cell = self.error.lock();
        (cell.code, cell.text.clone())
    }

    /// A connection with no engine behind it, for exercising dispatch
    /// and registry behavior in tests.
    #[cfg(test)]
    pub fn stub(kind: EngineKind) -> Self {
        Self::new(
            kind,
            OpenProfile::default(),
            Session::Stub(crate::driver::stub::StubSession::new()),
            None,
            Trace::disabled(),
        )
    }
}
