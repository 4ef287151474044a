//! Engine-B Simple API
//!
//! Typed function table over the YottaDB shared library. Every entry
//! point is required; the two call-in bridges are C-variadic and stay
//! `unsafe` at the call site.

use std::os::raw::{c_char, c_int, c_void};

use super::{CiNameDescriptor, EngineLibrary, FfiError, YdbBuffer};

/// Delete mode: kill the node and its entire subtree.
pub const DEL_TREE: c_int = 1;

pub type InitFn = extern "C" fn() -> c_int;
pub type ExitFn = extern "C" fn() -> c_int;
pub type MallocFn = extern "C" fn(size: usize) -> *mut c_void;
pub type FreeFn = extern "C" fn(ptr: *mut c_void);

pub type DataFn = extern "C" fn(
    varname: *const YdbBuffer,
    subs_used: c_int,
    subsarray: *const YdbBuffer,
    ret_value: *mut u32,
) -> c_int;
pub type DeleteFn = extern "C" fn(
    varname: *const YdbBuffer,
    subs_used: c_int,
    subsarray: *const YdbBuffer,
    deltype: c_int,
) -> c_int;
pub type SetFn = extern "C" fn(
    varname: *const YdbBuffer,
    subs_used: c_int,
    subsarray: *const YdbBuffer,
    value: *const YdbBuffer,
) -> c_int;
pub type GetFn = extern "C" fn(
    varname: *const YdbBuffer,
    subs_used: c_int,
    subsarray: *const YdbBuffer,
    ret_value: *mut YdbBuffer,
) -> c_int;
pub type SubscriptFn = extern "C" fn(
    varname: *const YdbBuffer,
    subs_used: c_int,
    subsarray: *const YdbBuffer,
    ret_value: *mut YdbBuffer,
) -> c_int;
pub type NodeFn = extern "C" fn(
    varname: *const YdbBuffer,
    subs_used: c_int,
    subsarray: *const YdbBuffer,
    ret_subs_used: *mut c_int,
    ret_subsarray: *mut YdbBuffer,
) -> c_int;
pub type IncrFn = extern "C" fn(
    varname: *const YdbBuffer,
    subs_used: c_int,
    subsarray: *const YdbBuffer,
    increment: *const YdbBuffer,
    ret_value: *mut YdbBuffer,
) -> c_int;

pub type CiFn = unsafe extern "C" fn(c_rtn_name: *const c_char, ...) -> c_int;
pub type CipFn = unsafe extern "C" fn(ci_info: *mut CiNameDescriptor, ...) -> c_int;

/// The resolved Engine-B function table.
pub struct YdbApi {
    pub init: InitFn,
    pub exit: ExitFn,
    pub malloc: MallocFn,
    pub free: FreeFn,

    pub data: DataFn,
    pub delete: DeleteFn,
    pub set: SetFn,
    pub get: GetFn,
    pub subscript_next: SubscriptFn,
    pub subscript_previous: SubscriptFn,
    pub node_next: NodeFn,
    pub node_previous: NodeFn,
    pub incr: IncrFn,

    pub ci: CiFn,
    pub cip: CipFn,
}

impl YdbApi {
    /// Resolve the whole table from a loaded library.
    pub fn resolve(lib: &EngineLibrary) -> Result<Self, FfiError> {
        // Safety: every signature above mirrors the engine's simple-API
        // header for the named entry point.
        unsafe {
            Ok(YdbApi {
                init: lib.require("ydb_init")?,
                exit: lib.require("ydb_exit")?,
                malloc: lib.require("ydb_malloc")?,
                free: lib.require("ydb_free")?,

                data: lib.require("ydb_data_s")?,
                delete: lib.require("ydb_delete_s")?,
                set: lib.require("ydb_set_s")?,
                get: lib.require("ydb_get_s")?,
                subscript_next: lib.require("ydb_subscript_next_s")?,
                subscript_previous: lib.require("ydb_subscript_previous_s")?,
                node_next: lib.require("ydb_node_next_s")?,
                node_previous: lib.require("ydb_node_previous_s")?,
                incr: lib.require("ydb_incr_s")?,

                ci: lib.require("ydb_ci")?,
                cip: lib.require("ydb_cip")?,
            })
        }
    }
}
