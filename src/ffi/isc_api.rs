//! Engine-A Callin Interface
//!
//! Typed function table over the InterSystems callin library. Symbol
//! names are the resolved prefix (`Cache` or `Iris`) plus the entry-point
//! tail; the whole table resolves once while a connection opens.
//!
//! Required entry points fail resolution with the missing-symbol error.
//! Optional groups resolve to `None` and surface as capability flags;
//! a group is usable only when every one of its symbols resolved.

use std::os::raw::{c_char, c_double, c_int, c_uint, c_ulong};

use super::{AStr, EngineLibrary, ExStr, FfiError};

/// Terminal flag: all output goes to the terminal.
pub const TT_ALL: c_ulong = 1;
/// Terminal flag: output never goes to the terminal.
pub const TT_NEVER: c_ulong = 8;
/// Start the engine in programmer mode.
pub const PROG_MODE: c_ulong = 32;

/// Convert target: counted string.
pub const CONVERT_ASTRING: c_ulong = 3;
/// Stack-item type tag for an object reference.
pub const TYPE_OREF: c_int = 16;

pub type SetDirFn = extern "C" fn(dir: *mut c_char) -> c_int;
pub type SecureStartFn = extern "C" fn(
    username: *mut AStr,
    password: *mut AStr,
    exename: *mut AStr,
    flags: c_ulong,
    tout: c_int,
    prinp: *mut AStr,
    prout: *mut AStr,
) -> c_int;
pub type EndFn = extern "C" fn() -> c_int;

pub type ExStrNewFn = extern "C" fn(zstr: *mut ExStr, size: c_int) -> *mut c_char;
pub type ExStrNewWFn = extern "C" fn(zstr: *mut ExStr, size: c_int) -> *mut u16;
pub type ExStrNewHFn = extern "C" fn(zstr: *mut ExStr, size: c_int) -> *mut u32;
pub type PushExStrFn = extern "C" fn(sptr: *mut ExStr) -> c_int;
pub type PopExStrFn = extern "C" fn(sstrp: *mut ExStr) -> c_int;
pub type ExStrKillFn = extern "C" fn(obj: *mut ExStr) -> c_int;

pub type PushStrFn = extern "C" fn(len: c_int, ptr: *const c_char) -> c_int;
pub type PushStrWFn = extern "C" fn(len: c_int, ptr: *const u16) -> c_int;
pub type PushStrHFn = extern "C" fn(len: c_int, ptr: *const u32) -> c_int;
pub type PopStrFn = extern "C" fn(lenp: *mut c_int, strp: *mut *mut c_char) -> c_int;
pub type PopStrWFn = extern "C" fn(lenp: *mut c_int, strp: *mut *mut u16) -> c_int;
pub type PopStrHFn = extern "C" fn(lenp: *mut c_int, strp: *mut *mut u32) -> c_int;

pub type PushDblFn = extern "C" fn(num: c_double) -> c_int;
pub type PopDblFn = extern "C" fn(nump: *mut c_double) -> c_int;
pub type PushIntFn = extern "C" fn(num: c_int) -> c_int;
pub type PopIntFn = extern "C" fn(nump: *mut c_int) -> c_int;
pub type PushInt64Fn = extern "C" fn(num: i64) -> c_int;
pub type PopInt64Fn = extern "C" fn(nump: *mut i64) -> c_int;

pub type PushGlobalFn = extern "C" fn(nlen: c_int, nptr: *const c_char) -> c_int;
pub type PushGlobalXFn =
    extern "C" fn(nlen: c_int, nptr: *const c_char, elen: c_int, eptr: *const c_char) -> c_int;
pub type GlobalGetFn = extern "C" fn(narg: c_int, flag: c_int) -> c_int;
pub type GlobalSetFn = extern "C" fn(narg: c_int) -> c_int;
pub type GlobalDataFn = extern "C" fn(narg: c_int, valueflag: c_int) -> c_int;
pub type GlobalKillFn = extern "C" fn(narg: c_int, nodeonly: c_int) -> c_int;
pub type GlobalOrderFn = extern "C" fn(narg: c_int, dir: c_int, valueflag: c_int) -> c_int;
pub type GlobalQueryFn = extern "C" fn(narg: c_int, dir: c_int, valueflag: c_int) -> c_int;
pub type GlobalIncrementFn = extern "C" fn(narg: c_int) -> c_int;
pub type GlobalReleaseFn = extern "C" fn() -> c_int;

pub type AcquireLockFn = extern "C" fn(nsub: c_int, flg: c_int, tout: c_int, rval: *mut c_int) -> c_int;
pub type ReleaseAllLocksFn = extern "C" fn() -> c_int;
pub type ReleaseLockFn = extern "C" fn(nsub: c_int, flg: c_int) -> c_int;
pub type PushLockFn = extern "C" fn(nlen: c_int, nptr: *const c_char) -> c_int;

pub type AddGlobalFn = extern "C" fn(num: c_int, nptr: *const c_char) -> c_int;
pub type AddGlobalDescriptorFn = extern "C" fn(num: c_int) -> c_int;
pub type AddSsvnFn = extern "C" fn(num: c_int, nptr: *const c_char) -> c_int;
pub type AddSsvnDescriptorFn = extern "C" fn(num: c_int) -> c_int;
pub type MergeFn = extern "C" fn() -> c_int;

pub type PushFuncFn = extern "C" fn(
    rflag: *mut c_uint,
    tag_len: c_int,
    tag: *const c_char,
    routine_len: c_int,
    routine: *const c_char,
) -> c_int;
pub type ExtFunFn = extern "C" fn(flags: c_uint, narg: c_int) -> c_int;
pub type PushRtnFn = PushFuncFn;
pub type DoFunFn = ExtFunFn;
pub type DoRtnFn = ExtFunFn;

pub type CloseOrefFn = extern "C" fn(oref: c_uint) -> c_int;
pub type IncrementCountOrefFn = extern "C" fn(oref: c_uint) -> c_int;
pub type PopOrefFn = extern "C" fn(orefp: *mut c_uint) -> c_int;
pub type PushOrefFn = extern "C" fn(oref: c_uint) -> c_int;
pub type InvokeMethodFn = extern "C" fn(narg: c_int) -> c_int;
pub type PushMethodFn =
    extern "C" fn(oref: c_uint, mlen: c_int, mptr: *const c_char, flg: c_int) -> c_int;
pub type InvokeClassMethodFn = extern "C" fn(narg: c_int) -> c_int;
pub type PushClassMethodFn = extern "C" fn(
    clen: c_int,
    cptr: *const c_char,
    mlen: c_int,
    mptr: *const c_char,
    flg: c_int,
) -> c_int;
pub type GetPropertyFn = extern "C" fn() -> c_int;
pub type SetPropertyFn = extern "C" fn() -> c_int;
pub type PushPropertyFn = extern "C" fn(oref: c_uint, plen: c_int, pptr: *const c_char) -> c_int;

pub type TypeFn = extern "C" fn() -> c_int;
pub type EvalAFn = extern "C" fn(expr: *mut AStr) -> c_int;
pub type ExecuteAFn = extern "C" fn(cmd: *mut AStr) -> c_int;
pub type ConvertFn = extern "C" fn(dtype: c_ulong, rbuf: *mut AStr) -> c_int;
pub type ErrorAFn = extern "C" fn(msg: *mut AStr, src: *mut AStr, offp: *mut c_int) -> c_int;
pub type ErrxlateAFn = extern "C" fn(code: c_int, rbuf: *mut AStr) -> c_int;
pub type EnableMultiThreadFn = extern "C" fn() -> c_int;

/// Which optional entry-point groups the loaded library supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IscCapabilities {
    pub merge: bool,
    pub functions: bool,
    pub objects: bool,
    pub multithread: bool,
}

/// The resolved Engine-A function table.
pub struct IscApi {
    pub set_dir: SetDirFn,
    pub secure_start: SecureStartFn,
    pub end: EndFn,

    pub ex_str_new: ExStrNewFn,
    pub ex_str_new_w: ExStrNewWFn,
    pub ex_str_new_h: Option<ExStrNewHFn>,
    pub push_ex_str: PushExStrFn,
    pub push_ex_str_w: PushExStrFn,
    pub push_ex_str_h: Option<PushExStrFn>,
    pub pop_ex_str: PopExStrFn,
    pub pop_ex_str_w: PopExStrFn,
    pub pop_ex_str_h: Option<PopExStrFn>,
    pub ex_str_kill: ExStrKillFn,

    pub push_str: PushStrFn,
    pub push_str_w: PushStrWFn,
    pub push_str_h: Option<PushStrHFn>,
    pub pop_str: PopStrFn,
    pub pop_str_w: PopStrWFn,
    pub pop_str_h: Option<PopStrHFn>,

    pub push_dbl: PushDblFn,
    pub push_ieee_dbl: PushDblFn,
    pub pop_dbl: PopDblFn,
    pub push_int: PushIntFn,
    pub pop_int: PopIntFn,
    pub push_int64: Option<PushInt64Fn>,
    pub pop_int64: Option<PopInt64Fn>,

    pub push_global: PushGlobalFn,
    pub push_global_x: PushGlobalXFn,
    pub global_get: GlobalGetFn,
    pub global_set: GlobalSetFn,
    pub global_data: GlobalDataFn,
    pub global_kill: GlobalKillFn,
    pub global_order: GlobalOrderFn,
    pub global_query: GlobalQueryFn,
    pub global_increment: GlobalIncrementFn,
    pub global_release: GlobalReleaseFn,

    pub acquire_lock: AcquireLockFn,
    pub release_all_locks: ReleaseAllLocksFn,
    pub release_lock: ReleaseLockFn,
    pub push_lock: PushLockFn,

    pub add_global: Option<AddGlobalFn>,
    pub add_global_descriptor: Option<AddGlobalDescriptorFn>,
    pub add_ssvn: Option<AddSsvnFn>,
    pub add_ssvn_descriptor: Option<AddSsvnDescriptorFn>,
    pub merge: Option<MergeFn>,

    pub push_func: Option<PushFuncFn>,
    pub ext_fun: Option<ExtFunFn>,
    pub push_rtn: Option<PushRtnFn>,
    pub do_fun: Option<DoFunFn>,
    pub do_rtn: Option<DoRtnFn>,

    pub close_oref: Option<CloseOrefFn>,
    pub increment_count_oref: Option<IncrementCountOrefFn>,
    pub pop_oref: Option<PopOrefFn>,
    pub push_oref: Option<PushOrefFn>,
    pub invoke_method: Option<InvokeMethodFn>,
    pub push_method: Option<PushMethodFn>,
    pub invoke_class_method: Option<InvokeClassMethodFn>,
    pub push_class_method: Option<PushClassMethodFn>,
    pub get_property: Option<GetPropertyFn>,
    pub set_property: Option<SetPropertyFn>,
    pub push_property: Option<PushPropertyFn>,

    pub type_of: Option<TypeFn>,
    pub eval_a: Option<EvalAFn>,
    pub execute_a: Option<ExecuteAFn>,
    pub convert: Option<ConvertFn>,
    pub error_a: Option<ErrorAFn>,
    pub errxlate_a: Option<ErrxlateAFn>,
    pub enable_multi_thread: Option<EnableMultiThreadFn>,
}

impl IscApi {
    /// Resolve the whole table from a loaded library.
    ///
    /// `prior_version` reports whether a parsed engine version was
    /// already on record when resolution started; when it was, the
    /// functions and objects groups are forced off even if their
    /// symbols resolved.
    pub fn resolve(
        lib: &EngineLibrary,
        prefix: &str,
        prior_version: bool,
    ) -> Result<(Self, IscCapabilities), FfiError> {
        let s = |tail: &str| format!("{}{}", prefix, tail);

        // Safety: every signature above mirrors the engine's callin
        // header for the named entry point.
        unsafe {
            let api = IscApi {
                set_dir: lib.require(&s("SetDir"))?,
                secure_start: lib.require(&s("SecureStartA"))?,
                end: lib.require(&s("End"))?,

                ex_str_new: lib.require(&s("ExStrNew"))?,
                ex_str_new_w: lib.require(&s("ExStrNewW"))?,
                ex_str_new_h: lib.fun(&s("ExStrNewH")),
                push_ex_str: lib.require(&s("PushExStr"))?,
                push_ex_str_w: lib.require(&s("PushExStrW"))?,
                push_ex_str_h: lib.fun(&s("PushExStrH")),
                pop_ex_str: lib.require(&s("PopExStr"))?,
                pop_ex_str_w: lib.require(&s("PopExStrW"))?,
                pop_ex_str_h: lib.fun(&s("PopExStrH")),
                ex_str_kill: lib.require(&s("ExStrKill"))?,

                push_str: lib.require(&s("PushStr"))?,
                push_str_w: lib.require(&s("PushStrW"))?,
                push_str_h: lib.fun(&s("PushStrH")),
                pop_str: lib.require(&s("PopStr"))?,
                pop_str_w: lib.require(&s("PopStrW"))?,
                pop_str_h: lib.fun(&s("PopStrH")),

                push_dbl: lib.require(&s("PushDbl"))?,
                push_ieee_dbl: lib.require(&s("PushIEEEDbl"))?,
                pop_dbl: lib.require(&s("PopDbl"))?,
                push_int: lib.require(&s("PushInt"))?,
                pop_int: lib.require(&s("PopInt"))?,
                push_int64: lib.fun(&s("PushInt64")),
                pop_int64: lib.fun(&s("PopInt64")),

                push_global: lib.require(&s("PushGlobal"))?,
                push_global_x: lib.require(&s("PushGlobalX"))?,
                global_get: lib.require(&s("GlobalGet"))?,
                global_set: lib.require(&s("GlobalSet"))?,
                global_data: lib.require(&s("GlobalData"))?,
                global_kill: lib.require(&s("GlobalKill"))?,
                global_order: lib.require(&s("GlobalOrder"))?,
                global_query: lib.require(&s("GlobalQuery"))?,
                global_increment: lib.require(&s("GlobalIncrement"))?,
                global_release: lib.require(&s("GlobalRelease"))?,

                acquire_lock: lib.require(&s("AcquireLock"))?,
                release_all_locks: lib.require(&s("ReleaseAllLocks"))?,
                release_lock: lib.require(&s("ReleaseLock"))?,
                push_lock: lib.require(&s("PushLock"))?,

                add_global: lib.fun(&s("AddGlobal")),
                add_global_descriptor: lib.fun(&s("AddGlobalDescriptor")),
                add_ssvn: lib.fun(&s("AddSSVN")),
                add_ssvn_descriptor: lib.fun(&s("AddSSVNDescriptor")),
                merge: lib.fun(&s("Merge")),

                push_func: lib.fun(&s("PushFunc")),
                ext_fun: lib.fun(&s("ExtFun")),
                push_rtn: lib.fun(&s("PushRtn")),
                do_fun: lib.fun(&s("DoFun")),
                do_rtn: lib.fun(&s("DoRtn")),

                close_oref: lib.fun(&s("CloseOref")),
                increment_count_oref: lib.fun(&s("IncrementCountOref")),
                pop_oref: lib.fun(&s("PopOref")),
                push_oref: lib.fun(&s("PushOref")),
                invoke_method: lib.fun(&s("InvokeMethod")),
                push_method: lib.fun(&s("PushMethod")),
                invoke_class_method: lib.fun(&s("InvokeClassMethod")),
                push_class_method: lib.fun(&s("PushClassMethod")),
                get_property: lib.fun(&s("GetProperty")),
                set_property: lib.fun(&s("SetProperty")),
                push_property: lib.fun(&s("PushProperty")),

                type_of: lib.fun(&s("Type")),
                eval_a: lib.fun(&s("EvalA")),
                execute_a: lib.fun(&s("ExecuteA")),
                convert: lib.fun(&s("Convert")),
                error_a: lib.fun(&s("ErrorA")),
                errxlate_a: lib.fun(&s("ErrxlateA")),
                enable_multi_thread: lib.fun(&s("EnableMultiThread")),
            };
            let caps = api.capabilities(prior_version);
            Ok((api, caps))
        }
    }

    /// Derive the capability flags from what resolved.
    fn capabilities(&self, prior_version: bool) -> IscCapabilities {
        let merge = self.add_global.is_some()
            && self.add_global_descriptor.is_some()
            && self.add_ssvn.is_some()
            && self.add_ssvn_descriptor.is_some()
            && self.merge.is_some();
        let mut functions = self.push_func.is_some()
            && self.ext_fun.is_some()
            && self.push_rtn.is_some()
            && self.do_fun.is_some()
            && self.do_rtn.is_some();
        let mut objects = self.close_oref.is_some()
            && self.increment_count_oref.is_some()
            && self.pop_oref.is_some()
            && self.push_oref.is_some()
            && self.invoke_method.is_some()
            && self.push_method.is_some()
            && self.invoke_class_method.is_some()
            && self.push_class_method.is_some()
            && self.get_property.is_some()
            && self.set_property.is_some()
            && self.push_property.is_some();
        if prior_version {
            functions = false;
            objects = false;
        }
        IscCapabilities {
            merge,
            functions,
            objects,
            multithread: self.enable_multi_thread.is_some(),
        }
    }
}
