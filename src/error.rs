//! Status Codes and Error Translation
//!
//! Native engine status codes, the canonical message table for Engine-A
//! statuses, and the error type operations propagate internally before
//! their message lands in the reply as an error-tagged block.

use thiserror::Error;

/// Engine-A callin status codes, shared with the capability refusals and
/// the adapter's own validation statuses.
pub mod status {
    pub const OK: i32 = 0;
    pub const FAILURE: i32 = -1;
    pub const ALREADY_CONNECTED: i32 = -2;
    pub const STRING_TOO_LONG: i32 = -3;
    pub const CONNECTION_BROKEN: i32 = -4;
    pub const NO_CONNECTION: i32 = -7;
    pub const NO_RESOURCES: i32 = -13;
    pub const ACCESS_DENIED: i32 = -15;
    pub const CHANGE_PASSWORD: i32 = -16;

    pub const ER_MAX_STRING: i32 = 5;
    pub const ER_NO_LINE: i32 = 8;
    pub const ER_UNDEFINED: i32 = 9;
    pub const ER_SYSTEM: i32 = 10;
    pub const ER_SUBSCRIPT: i32 = 16;
    pub const ER_NO_ROUTINE: i32 = 17;
    pub const ER_STRING_STACK: i32 = 20;
    pub const ER_UNIMPLEMENTED: i32 = 22;
    pub const ER_ARG_STACK: i32 = 25;
    pub const ER_PROTECT: i32 = 27;
    pub const ER_PARAMETER: i32 = 40;
    pub const ER_NAMESPACE: i32 = 83;
    pub const ER_BAD_OREF: i32 = 119;
    pub const ER_NO_METHOD: i32 = 120;
    pub const ER_NO_PROPERTY: i32 = 121;
    pub const ER_NO_CLASS: i32 = 122;

    pub const TIMEOUT: i32 = -100;
    pub const BAD_STRING: i32 = -101;
    pub const BAD_NAMESPACE: i32 = -102;
    pub const BAD_GLOBAL: i32 = -103;
    pub const BAD_FUNCTION: i32 = -104;
    pub const BAD_CLASS: i32 = -105;
    pub const BAD_METHOD: i32 = -106;

    /// Engine-B status for reading an undefined global node.
    pub const YDB_GVUNDEF: i32 = -150373850;

    /// Stored code for open-time failures: library load, symbol
    /// resolution, and duplicate connection attempts.
    pub const OPEN_ERROR: i32 = 1009;
}

/// Stored form of a native status code: negative codes map into the 900
/// range, positive codes keep their value.
pub fn stored_code(code: i32) -> i32 {
    if code < 0 {
        900 + (-code)
    } else {
        code
    }
}

/// Canonical message for an Engine-A status code.
pub fn canonical_text(code: i32) -> &'static str {
    match code {
        status::OK => "Operation completed successfully!",
        status::ACCESS_DENIED => {
            "Authentication has failed. Check the audit log for the real authentication error."
        }
        status::ALREADY_CONNECTED => {
            "Connection already existed. Returned if you call CacheSecureStartH from a $ZF function."
        }
        status::CHANGE_PASSWORD => {
            "Password change required. This return value is only returned if you are using Cach\u{e9} authentication."
        }
        status::CONNECTION_BROKEN => {
            "Connection was broken by the server. Check arguments for validity."
        }
        status::FAILURE => "An unexpected error has occurred.",
        status::STRING_TOO_LONG => "String is too long.",
        status::NO_CONNECTION => "No connection has been established.",
        status::ER_SYSTEM => {
            "Either the Cache engine generated a <SYSTEM> error, or callin detected an internal data inconsistency."
        }
        status::ER_ARG_STACK => "Argument stack overflow.",
        status::ER_STRING_STACK => "String stack overflow.",
        status::ER_PROTECT => "Protection violation.",
        status::ER_UNDEFINED => "Global node is undefined",
        status::ER_UNIMPLEMENTED => "String is undefined OR feature is not implemented.",
        status::ER_SUBSCRIPT => "Subscript error in Global node (subscript null/empty or too long)",
        status::ER_NO_ROUTINE => "Routine does not exist",
        status::ER_NO_LINE => "Function does not exist in routine",
        status::ER_PARAMETER => "Function arguments error",
        status::BAD_GLOBAL => "Invalid global name",
        status::BAD_NAMESPACE => "Invalid NameSpace name",
        status::BAD_FUNCTION => "Invalid function name",
        status::BAD_CLASS => "Invalid class name",
        status::BAD_METHOD => "Invalid method name",
        status::ER_NO_CLASS => "Class does not exist",
        status::ER_BAD_OREF => "Invalid Object Reference",
        status::ER_NO_METHOD => "Method does not exist",
        status::ER_NO_PROPERTY => "Property does not exist",
        status::TIMEOUT => "Operation timed out",
        status::BAD_STRING => "Invalid string",
        status::ER_NAMESPACE => "Invalid Namespace",
        _ => "Database Server Error",
    }
}

/// An operation failure on its way to the reply buffer.
///
/// `Native` carries a raw engine status and translates through the
/// engine's message machinery; `Preset` carries a ready message that
/// translation must not overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    #[error("engine status {0}")]
    Native(i32),
    #[error("{text}")]
    Preset { code: i32, text: String },
}

impl DbError {
    /// Attach a pre-set message to a status code.
    pub fn preset(code: i32, text: impl Into<String>) -> Self {
        DbError::Preset {
            code,
            text: text.into(),
        }
    }

    /// The native status code behind this error.
    pub fn code(&self) -> i32 {
        match self {
            DbError::Native(code) => *code,
            DbError::Preset { code, .. } => *code,
        }
    }
}

impl From<crate::protocol::WireError> for DbError {
    fn from(_: crate::protocol::WireError) -> Self {
        // Decode failures all surface as the invalid-string status; the
        // decoder's own message only shows up in the trace.
        DbError::preset(status::BAD_STRING, canonical_text(status::BAD_STRING))
    }
}

impl From<crate::ffi::FfiError> for DbError {
    fn from(err: crate::ffi::FfiError) -> Self {
        DbError::preset(status::OPEN_ERROR, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_code_maps_negatives_into_900_range() {
        assert_eq!(stored_code(status::NO_CONNECTION), 907);
        assert_eq!(stored_code(status::BAD_FUNCTION), 1004);
        assert_eq!(stored_code(status::ER_UNDEFINED), 9);
        assert_eq!(stored_code(0), 0);
    }

    #[test]
    fn test_canonical_texts() {
        assert_eq!(
            canonical_text(status::ER_UNDEFINED),
            "Global node is undefined"
        );
        assert_eq!(canonical_text(status::BAD_GLOBAL), "Invalid global name");
        assert_eq!(canonical_text(12345), "Database Server Error");
        assert_eq!(canonical_text(status::TIMEOUT), "Operation timed out");
    }

    #[test]
    fn test_db_error_code() {
        assert_eq!(DbError::Native(status::FAILURE).code(), -1);
        assert_eq!(
            DbError::preset(status::BAD_CLASS, "Invalid class name").code(),
            status::BAD_CLASS
        );
    }
}
