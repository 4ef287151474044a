//! Foreign Engine Boundary
//!
//! Everything that touches a database engine's shared library lives under
//! this module: the loader, the `#[repr(C)]` boundary types, and the two
//! typed function tables.
//!
//! # Architecture
//!
//! ```text
//! Operation dispatch
//!       │
//!       ▼
//! EngineLibrary (dlopen via libloading)
//!       │  resolved once at connect time
//!       ▼
//! IscApi / YdbApi (typed fn-pointer tables)
//!       │
//!       ▼
//! libirisdb / libcache / libyottadb
//! ```
//!
//! Every entry point is resolved exactly once while a connection opens;
//! after that, calls go through plain function pointers with no name
//! lookup on the hot path. Optional symbols resolve to `None` and become
//! capability flags checked before dispatch.

mod loader;
mod types;

pub mod isc_api;
pub mod ydb_api;

pub use loader::EngineLibrary;
pub use types::{AStr, CiNameDescriptor, ExStr, YdbBuffer, YdbString, ASTR_CAPACITY};

use thiserror::Error;

/// Shared-library boundary failures. Messages are formatted where the
/// failure happens so they carry the product name and library path.
#[derive(Debug, Clone, Error)]
pub enum FfiError {
    /// The library itself failed to load
    #[error("{0}")]
    Load(String),
    /// A required entry point is missing from a loaded library
    #[error("{0}")]
    Symbol(String),
}

impl FfiError {
    /// Message for a library that failed to load.
    pub fn load_failure(product: &str, path: &str, detail: Option<&str>) -> Self {
        let mut message = format!(
            "Error loading {} Library: {}; Error Code : 1009",
            product, path
        );
        if let Some(detail) = detail {
            message.push_str(&format!(" ({})", detail));
        }
        FfiError::Load(message)
    }

    /// Message for a required entry point that did not resolve.
    pub fn missing_symbol(product: &str, path: &str, name: &str) -> Self {
        FfiError::Symbol(format!(
            "Error loading {} library: {}; Cannot locate the following function : {}",
            product, path, name
        ))
    }
}
