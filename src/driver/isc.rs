//! Engine-A driver: the push/pop callin convention.
//!
//! Cache and IRIS expose one argument stack per session. A reference
//! goes onto the stack one push at a time, the operation fires with an
//! argument count, and the result comes back off the stack. Strings
//! shorter than the short-string ceiling travel through `PushStr`;
//! anything longer rides an engine-allocated cell that must be released
//! after use, success or failure.
//!
//! The session starts by loading the callin library out of the
//! installation's `bin` directory, authenticating, probing `$ZVersion`,
//! and switching to the requested namespace. Which flavour actually
//! answers is decided by the file that loads, not by the profile: a
//! `cache` profile pointed at an IRIS installation drives IRIS entry
//! points, and the other way round.

use std::os::raw::{c_int, c_uint};

use crate::error::{canonical_text, status, DbError};
use crate::ffi::isc_api::{self, IscApi, IscCapabilities};
use crate::ffi::{AStr, EngineLibrary, ExStr};
use crate::lock::ReentrantLock;
use crate::protocol::{Argument, Kind, ReplyBuffer, Sort, MAX_SHORT_STRING};
use crate::registry::EngineVersion;
use crate::trace::Trace;

use super::{leading_f64, leading_i32, split_function_reference, Driver, EngineKind, OpenProfile};

/// Seconds the engine waits for the authentication handshake.
const AUTH_TIMEOUT: c_int = 15;

/// Namespace names longer than this never reach the engine.
const NAMESPACE_MAX: usize = 64;

pub struct IscSession {
    lib: EngineLibrary,
    api: IscApi,
    caps: IscCapabilities,
    prefix: &'static str,
    trace: Trace,
    /// True when the engine reported an already-running session at
    /// start. Such a session keeps its namespace and thread setup.
    reused: bool,
}

impl IscSession {
    /// Load the callin library for `kind` under the profile's
    /// installation path and start an authenticated session.
    pub fn open(
        kind: EngineKind,
        profile: &OpenProfile,
        trace: &Trace,
    ) -> Result<(IscSession, Option<EngineVersion>), DbError> {
        let libdir = library_directory(&profile.path);
        let candidates = candidate_paths(kind, &libdir);
        let mut lib = EngineLibrary::open_first(kind.product(), &candidates)?;

        // The file that loaded decides the flavour.
        let (flavor, prefix) = if file_name(lib.path()).contains("iris") {
            (EngineKind::Iris, "Iris")
        } else {
            (EngineKind::Cache, "Cache")
        };
        lib.set_product(flavor.product());
        trace.log(&format!("loaded {}", lib.path()));

        let (api, caps) = IscApi::resolve(&lib, prefix, false)?;
        let mut session = IscSession {
            lib,
            api,
            caps,
            prefix,
            trace: trace.clone(),
            reused: false,
        };

        let mut dir = c_buffer(&profile.path);
        let rc = (session.api.set_dir)(dir.as_mut_ptr().cast());
        session
            .trace
            .log(&format!("{}=={}SetDir({})", rc, prefix, profile.path));

        match session.authenticate(profile)? {
            AuthOutcome::Fresh(version) => Ok((session, version)),
            AuthOutcome::Attached => {
                session.reused = true;
                Ok((session, None))
            }
        }
    }

    pub fn capabilities(&self) -> IscCapabilities {
        self.caps
    }

    pub fn library(&self) -> &EngineLibrary {
        &self.lib
    }

    /// Whether namespace reads (or writes, with `write`) can reach the
    /// engine through the resolved entry points.
    pub fn namespace_enabled(&self, write: bool) -> bool {
        if write {
            self.api.execute_a.is_some()
        } else {
            self.api.eval_a.is_some() && self.api.convert.is_some()
        }
    }

    /// The tail of the open sequence, run once the connection owns its
    /// lock: switch to the requested namespace and arm multi-thread
    /// support. Neither failure fails the open. An attached session is
    /// left exactly as its original starter configured it.
    pub(crate) fn finish_open(&self, lock: &ReentrantLock, namespace: &str) {
        if self.reused {
            self.trace.log("existing session kept as-is");
            return;
        }
        if let Err(err) = self.change_namespace(lock, namespace) {
            self.trace
                .log(&format!("namespace switch skipped ({})", err.code()));
        }
        if let Some(enable) = self.api.enable_multi_thread {
            let rc = enable();
            self.trace
                .log(&format!("{}=={}EnableMultiThread()", rc, self.prefix));
        }
    }

    fn authenticate(&self, profile: &OpenProfile) -> Result<AuthOutcome, DbError> {
        #[cfg(unix)]
        {
            // The engine signals worker threads with SIGUSR1; the
            // process disposition has to ignore it or the default
            // action kills us.
            unsafe { libc::signal(libc::SIGUSR1, libc::SIG_IGN) };
            self.trace.log("signal(SIGUSR1, SIG_IGN)");
        }

        let mut exename = AStr::new();
        exename.set(b"mlink");
        let mut username = AStr::new();
        username.set(profile.username.as_bytes());
        let mut password = AStr::new();
        password.set(profile.password.as_bytes());

        let mut pin = AStr::new();
        let mut pout = AStr::new();
        let pin_ptr: *mut AStr = match device_string(&profile.input_device, "stdin") {
            Some(device) => {
                pin.set(device.as_bytes());
                &mut pin
            }
            None => std::ptr::null_mut(),
        };
        let pout_ptr: *mut AStr = match device_string(&profile.output_device, "stdout") {
            Some(device) => {
                pout.set(device.as_bytes());
                &mut pout
            }
            None => std::ptr::null_mut(),
        };
        let termflag = if !pin_ptr.is_null() && !pout_ptr.is_null() {
            isc_api::TT_ALL | isc_api::PROG_MODE
        } else {
            isc_api::TT_NEVER | isc_api::PROG_MODE
        };

        // One transparent retry when the session drops between the
        // start call and the version probe.
        for attempt in 0..2 {
            let rc = (self.api.secure_start)(
                &mut username,
                &mut password,
                &mut exename,
                termflag,
                AUTH_TIMEOUT,
                pin_ptr,
                pout_ptr,
            );
            self.trace.log(&format!(
                "{}=={}SecureStartA(user={})",
                rc, self.prefix, profile.username
            ));
            if rc == status::ALREADY_CONNECTED {
                return Ok(AuthOutcome::Attached);
            }
            if rc != status::OK {
                return Err(DbError::preset(rc, auth_failure_text(rc)));
            }

            match self.probe_version() {
                Probe::Settled(version) => return Ok(AuthOutcome::Fresh(version)),
                Probe::Broken if attempt == 0 => continue,
                Probe::Broken => {
                    let rc = status::CONNECTION_BROKEN;
                    return Err(DbError::preset(rc, auth_failure_text(rc)));
                }
            }
        }
        Ok(AuthOutcome::Fresh(None))
    }

    /// Read `$ZVersion` through the evaluator, when the library has one.
    fn probe_version(&self) -> Probe {
        let (eval, convert) = match (self.api.eval_a, self.api.convert) {
            (Some(eval), Some(convert)) => (eval, convert),
            _ => return Probe::Settled(None),
        };

        let mut expr = AStr::new();
        expr.set(b"$ZVersion");
        let rc = eval(&mut expr);
        self.trace
            .log(&format!("{}=={}EvalA($ZVersion)", rc, self.prefix));
        if rc == status::CONNECTION_BROKEN {
            return Probe::Broken;
        }
        if rc != status::OK {
            return Probe::Settled(None);
        }

        let mut retval = AStr::new();
        retval.len = 256;
        let rc = convert(isc_api::CONVERT_ASTRING, &mut retval);
        if rc == status::CONNECTION_BROKEN {
            return Probe::Broken;
        }
        if rc != status::OK {
            return Probe::Settled(None);
        }
        let text = String::from_utf8_lossy(retval.as_bytes()).into_owned();
        self.trace.log(&format!("$ZVersion={}", text));
        Probe::Settled(Some(parse_isc_zv(&text)))
    }

    /// Run the namespace switch. The switch serializes on the
    /// connection lock by itself because it also runs from the open
    /// path, where no operation holds the lock yet.
    pub(crate) fn change_namespace(
        &self,
        lock: &ReentrantLock,
        name: &str,
    ) -> Result<(), DbError> {
        if name.is_empty() || name.len() > NAMESPACE_MAX {
            return Err(DbError::Native(status::ER_NAMESPACE));
        }
        let execute = self
            .api
            .execute_a
            .ok_or(DbError::Native(status::ER_NAMESPACE))?;

        let command = format!("ZN \"{}\"", name);
        let mut expr = AStr::new();
        expr.set(command.as_bytes());

        let _held = lock.acquire();
        let rc = execute(&mut expr);
        self.trace
            .log(&format!("{}=={}ExecuteA({})", rc, self.prefix, command));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        Ok(())
    }

    /// Push a global reference: the name first, its `^` sigil stripped,
    /// then every remaining argument. The returned guard releases any
    /// long-string cells when the operation ends.
    fn push_global_reference<'a>(
        &'a self,
        args: &[Argument<'_>],
    ) -> Result<ExStrGuard<'a>, DbError> {
        let mut guard = ExStrGuard::new(&self.api);
        for (n, arg) in args.iter().enumerate() {
            let rc = if n == 0 {
                let bytes = arg.bytes();
                let name = match bytes.first() {
                    Some(b'^') => &bytes[1..],
                    _ => bytes,
                };
                (self.api.push_global)(name.len() as c_int, name.as_ptr().cast())
            } else {
                self.push_argument(arg, &mut guard)?
            };
            if rc != status::OK {
                return Err(DbError::Native(rc));
            }
        }
        Ok(guard)
    }

    /// Push one argument in its wire type.
    fn push_argument(
        &self,
        arg: &Argument<'_>,
        guard: &mut ExStrGuard<'_>,
    ) -> Result<c_int, DbError> {
        let rc = match arg {
            Argument::Int { value, .. } => self.push_numeric(*value),
            Argument::Double { value, .. } => (self.api.push_dbl)(*value),
            Argument::Str(bytes) => {
                if bytes.len() < MAX_SHORT_STRING {
                    (self.api.push_str)(bytes.len() as c_int, bytes.as_ptr().cast())
                } else {
                    let cell = self.new_long_string(bytes)?;
                    (self.api.push_ex_str)(guard.hold(cell))
                }
            }
        };
        Ok(rc)
    }

    fn push_numeric(&self, value: i64) -> c_int {
        match c_int::try_from(value) {
            Ok(narrow) => (self.api.push_int)(narrow),
            Err(_) => match self.api.push_int64 {
                Some(push_int64) => push_int64(value),
                None => (self.api.push_int)(value as c_int),
            },
        }
    }

    /// Allocate an engine cell for a long string and copy the bytes in,
    /// with a terminating NUL behind them.
    fn new_long_string(&self, bytes: &[u8]) -> Result<ExStr, DbError> {
        let mut cell = ExStr::empty();
        let ptr = (self.api.ex_str_new)(&mut cell, bytes.len() as c_int + 1);
        if ptr.is_null() {
            return Err(DbError::Native(status::NO_RESOURCES));
        }
        // Safety: the engine handed us len + 1 writable bytes at ptr.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            ptr.add(bytes.len()).write(0);
        }
        cell.len = bytes.len() as u32;
        Ok(cell)
    }

    /// Pop the operation result off the engine stack into the reply.
    ///
    /// An object reference pops as its handle in decimal; everything
    /// else pops as a counted cell that is released once copied.
    fn pop_value(&self, reply: &mut ReplyBuffer) -> Result<(), DbError> {
        if let (Some(type_of), Some(pop_oref)) = (self.api.type_of, self.api.pop_oref) {
            if type_of() == isc_api::TYPE_OREF {
                let mut oref: c_uint = 0;
                let rc = pop_oref(&mut oref);
                self.trace
                    .log(&format!("{}=={}PopOref({})", rc, self.prefix, oref));
                reply.set_value(Sort::Data, Kind::StrB, oref.to_string().as_bytes());
                return Ok(());
            }
        }

        let mut cell = ExStr::empty();
        let rc = (self.api.pop_ex_str)(&mut cell);
        let result = if rc == status::OK {
            reply.set_value(Sort::Data, Kind::StrB, cell.as_bytes());
            Ok(())
        } else {
            Err(DbError::Native(rc))
        };
        (self.api.ex_str_kill)(&mut cell);
        result
    }

    fn objects_api(&self) -> Result<ObjectsApi, DbError> {
        match (
            self.api.push_class_method,
            self.api.invoke_class_method,
            self.api.push_method,
            self.api.invoke_method,
            self.api.push_property,
            self.api.get_property,
            self.api.set_property,
            self.api.close_oref,
        ) {
            (
                Some(push_class_method),
                Some(invoke_class_method),
                Some(push_method),
                Some(invoke_method),
                Some(push_property),
                Some(get_property),
                Some(set_property),
                Some(close_oref),
            ) => Ok(ObjectsApi {
                push_class_method,
                invoke_class_method,
                push_method,
                invoke_method,
                push_property,
                get_property,
                set_property,
                close_oref,
            }),
            _ => Err(super::objects_refusal()),
        }
    }
}

impl Driver for IscSession {
    fn global_set(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let _cells = self.push_global_reference(args)?;
        let narg = args.len() as c_int - 2;
        let rc = (self.api.global_set)(narg);
        self.trace
            .log(&format!("{}=={}GlobalSet({})", rc, self.prefix, narg));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        reply.set_value(Sort::Data, Kind::StrB, rc.to_string().as_bytes());
        Ok(())
    }

    fn global_get(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let _cells = self.push_global_reference(args)?;
        let narg = args.len() as c_int - 1;
        let rc = (self.api.global_get)(narg, 0);
        self.trace
            .log(&format!("{}=={}GlobalGet({})", rc, self.prefix, narg));
        if rc == status::ER_UNDEFINED {
            reply.set_value(Sort::Data, Kind::StrB, b"");
            return Ok(());
        }
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        self.pop_value(reply)
    }

    fn global_next(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let _cells = self.push_global_reference(args)?;
        let narg = args.len() as c_int - 1;
        let rc = (self.api.global_order)(narg, 1, 0);
        self.trace
            .log(&format!("{}=={}GlobalOrder({}, 1)", rc, self.prefix, narg));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        self.pop_value(reply)
    }

    fn global_previous(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        let _cells = self.push_global_reference(args)?;
        let narg = args.len() as c_int - 1;
        let rc = (self.api.global_order)(narg, -1, 0);
        self.trace
            .log(&format!("{}=={}GlobalOrder({}, -1)", rc, self.prefix, narg));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        self.pop_value(reply)
    }

    fn global_delete(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let _cells = self.push_global_reference(args)?;
        let narg = args.len() as c_int - 1;
        let rc = (self.api.global_kill)(narg, 0);
        self.trace
            .log(&format!("{}=={}GlobalKill({})", rc, self.prefix, narg));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        reply.set_value(Sort::Data, Kind::StrB, rc.to_string().as_bytes());
        Ok(())
    }

    fn global_defined(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        let _cells = self.push_global_reference(args)?;
        let narg = args.len() as c_int - 1;
        let rc = (self.api.global_data)(narg, 0);
        self.trace
            .log(&format!("{}=={}GlobalData({})", rc, self.prefix, narg));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        let mut state: c_int = 0;
        (self.api.pop_int)(&mut state);
        reply.set_value(Sort::Data, Kind::StrB, state.to_string().as_bytes());
        Ok(())
    }

    fn global_increment(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        let _cells = self.push_global_reference(args)?;
        let narg = args.len() as c_int - 2;
        let rc = (self.api.global_increment)(narg);
        self.trace
            .log(&format!("{}=={}GlobalIncrement({})", rc, self.prefix, narg));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        self.pop_value(reply)
    }

    fn call_function(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let reference = args.first().map(|arg| arg.bytes()).unwrap_or(b"");
        let (label, routine) = split_function_reference(reference).ok_or_else(|| {
            DbError::preset(status::BAD_FUNCTION, canonical_text(status::BAD_FUNCTION))
        })?;
        let (push_func, ext_fun) = match (self.api.push_func, self.api.ext_fun) {
            (Some(push_func), Some(ext_fun)) => (push_func, ext_fun),
            _ => return Err(super::functions_refusal()),
        };

        let mut guard = ExStrGuard::new(&self.api);
        let mut rflag: c_uint = 0;
        let mut rc = push_func(
            &mut rflag,
            label.len() as c_int,
            label.as_ptr().cast(),
            routine.len() as c_int,
            routine.as_ptr().cast(),
        );
        for arg in args.get(1..).unwrap_or(&[]) {
            if rc != status::OK {
                break;
            }
            rc = self.push_argument(arg, &mut guard)?;
        }
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }

        let narg = args.len() as c_int - 1;
        let rc = ext_fun(rflag, narg);
        self.trace
            .log(&format!("{}=={}ExtFun({}, {})", rc, self.prefix, rflag, narg));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        self.pop_value(reply)
    }

    fn class_method(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let objects = self.objects_api()?;
        let class = args.first().map(|arg| arg.bytes()).unwrap_or(b"");
        let method = args.get(1).map(|arg| arg.bytes()).unwrap_or(b"");

        let mut guard = ExStrGuard::new(&self.api);
        let mut rc = (objects.push_class_method)(
            class.len() as c_int,
            class.as_ptr().cast(),
            method.len() as c_int,
            method.as_ptr().cast(),
            1,
        );
        for arg in args.get(2..).unwrap_or(&[]) {
            if rc != status::OK {
                break;
            }
            rc = self.push_argument(arg, &mut guard)?;
        }
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }

        let narg = args.len() as c_int - 2;
        let rc = (objects.invoke_class_method)(narg);
        self.trace.log(&format!(
            "{}=={}InvokeClassMethod({})",
            rc, self.prefix, narg
        ));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        self.pop_value(reply)
    }

    fn instance_method(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        let objects = self.objects_api()?;
        let oref = parse_oref(args);
        let method = args.get(1).map(|arg| arg.bytes()).unwrap_or(b"");

        let mut guard = ExStrGuard::new(&self.api);
        let mut rc = (objects.push_method)(oref, method.len() as c_int, method.as_ptr().cast(), 1);
        for arg in args.get(2..).unwrap_or(&[]) {
            if rc != status::OK {
                break;
            }
            rc = self.push_argument(arg, &mut guard)?;
        }
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }

        let narg = args.len() as c_int - 2;
        let rc = (objects.invoke_method)(narg);
        self.trace
            .log(&format!("{}=={}InvokeMethod({})", rc, self.prefix, narg));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        self.pop_value(reply)
    }

    fn get_property(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let objects = self.objects_api()?;
        let oref = parse_oref(args);
        let name = args.get(1).map(|arg| arg.bytes()).unwrap_or(b"");

        let rc = (objects.push_property)(oref, name.len() as c_int, name.as_ptr().cast());
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        let rc = (objects.get_property)();
        self.trace
            .log(&format!("{}=={}GetProperty()", rc, self.prefix));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        self.pop_value(reply)
    }

    fn set_property(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let objects = self.objects_api()?;
        let oref = parse_oref(args);
        let name = args.get(1).map(|arg| arg.bytes()).unwrap_or(b"");

        let mut guard = ExStrGuard::new(&self.api);
        let mut rc = (objects.push_property)(oref, name.len() as c_int, name.as_ptr().cast());
        for arg in args.get(2..).unwrap_or(&[]) {
            if rc != status::OK {
                break;
            }
            rc = self.push_argument(arg, &mut guard)?;
        }
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        let rc = (objects.set_property)();
        self.trace
            .log(&format!("{}=={}SetProperty()", rc, self.prefix));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        reply.set_value(Sort::Data, Kind::StrB, b"");
        Ok(())
    }

    fn close_instance(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        let objects = self.objects_api()?;
        let oref = parse_oref(args);
        let rc = (objects.close_oref)(oref);
        self.trace
            .log(&format!("{}=={}CloseOref({})", rc, self.prefix, oref));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        reply.set_value(Sort::Data, Kind::StrB, b"");
        Ok(())
    }

    fn get_namespace(&self, reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let (eval, convert) = match (self.api.eval_a, self.api.convert) {
            (Some(eval), Some(convert)) => (eval, convert),
            _ => return Err(super::namespace_refusal(super::CODE_UNRESOLVED)),
        };

        let mut expr = AStr::new();
        expr.set(b"$Namespace");
        let rc = eval(&mut expr);
        self.trace
            .log(&format!("{}=={}EvalA($Namespace)", rc, self.prefix));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }

        let mut retval = AStr::new();
        retval.len = 256;
        let rc = convert(isc_api::CONVERT_ASTRING, &mut retval);
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        if retval.len as usize >= reply.declared_capacity() {
            return Err(DbError::Native(status::BAD_NAMESPACE));
        }
        reply.set_value(Sort::Data, Kind::StrB, retval.as_bytes());
        Ok(())
    }

    fn set_namespace(
        &self,
        lock: &ReentrantLock,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        let requested = args.first().map(|arg| arg.bytes()).unwrap_or(b"");
        let name = if requested.len() < 120 {
            String::from_utf8_lossy(requested).into_owned()
        } else {
            String::new()
        };
        self.change_namespace(lock, &name)?;
        reply.set_value(Sort::Data, Kind::StrB, requested);
        Ok(())
    }

    fn error_text(&self, code: i32) -> String {
        let mut text = String::new();
        if let Some(errxlate) = self.api.errxlate_a {
            let mut buffer = AStr::new();
            buffer.len = 50;
            let rc = errxlate(code, &mut buffer);
            self.trace
                .log(&format!("{}=={}ErrxlateA({})", rc, self.prefix, code));
            let bytes = buffer.as_bytes();
            let cut = bytes.len().min(50);
            text.push_str(&String::from_utf8_lossy(&bytes[..cut]));
        }
        text.push_str(canonical_text(code));
        text
    }

    fn shutdown(&self) -> i32 {
        let rc = (self.api.end)();
        self.trace.log(&format!("{}=={}End()", rc, self.prefix));
        rc
    }
}

enum AuthOutcome {
    /// A new session started; the version probe may have run.
    Fresh(Option<EngineVersion>),
    /// The process already had a session; it stays untouched.
    Attached,
}

enum Probe {
    /// The probe finished, with or without a parsed version.
    Settled(Option<EngineVersion>),
    /// The connection dropped mid-probe.
    Broken,
}

/// The object entry points, unwrapped as a bundle.
struct ObjectsApi {
    push_class_method: isc_api::PushClassMethodFn,
    invoke_class_method: isc_api::InvokeClassMethodFn,
    push_method: isc_api::PushMethodFn,
    invoke_method: isc_api::InvokeMethodFn,
    push_property: isc_api::PushPropertyFn,
    get_property: isc_api::GetPropertyFn,
    set_property: isc_api::SetPropertyFn,
    close_oref: isc_api::CloseOrefFn,
}

/// Holds the engine-allocated string cells pushed for one operation and
/// releases every one of them when the operation ends, however it ends.
struct ExStrGuard<'a> {
    api: &'a IscApi,
    cells: Vec<ExStr>,
}

impl<'a> ExStrGuard<'a> {
    fn new(api: &'a IscApi) -> Self {
        ExStrGuard {
            api,
            cells: Vec::new(),
        }
    }

    /// Keep a cell alive until the guard drops and hand back a pointer
    /// for the push.
    fn hold(&mut self, cell: ExStr) -> &mut ExStr {
        self.cells.push(cell);
        let last = self.cells.len() - 1;
        &mut self.cells[last]
    }
}

impl Drop for ExStrGuard<'_> {
    fn drop(&mut self) {
        for cell in &mut self.cells {
            (self.api.ex_str_kill)(cell);
        }
    }
}

/// Derive the shared-library directory from the installation path: the
/// last path component is swapped for `bin/`. A path with no separator
/// is used as-is, and candidates are appended to it directly.
fn library_directory(shdir: &str) -> String {
    let mut dir = shdir.as_bytes().to_vec();
    if let Some(&last) = dir.last() {
        if last == b'/' || last == b'\\' {
            dir.pop();
        }
    }
    for n in (1..dir.len()).rev() {
        if dir[n] == b'/' {
            dir.truncate(n + 1);
            dir.extend_from_slice(b"bin/");
            break;
        }
        if dir[n] == b'\\' {
            dir.truncate(n + 1);
            dir.extend_from_slice(b"bin\\");
            break;
        }
    }
    String::from_utf8_lossy(&dir).into_owned()
}

/// Library candidates in flavour preference order: the requested
/// product's names first, the sibling product's as a fallback.
fn candidate_paths(kind: EngineKind, libdir: &str) -> Vec<String> {
    let names: &[&str] = if kind == EngineKind::Iris {
        if cfg!(windows) {
            &["irisdb.dll", "cache.dll"]
        } else if cfg!(target_os = "macos") {
            &[
                "libirisdb.dylib",
                "libirisdb.so",
                "libcache.dylib",
                "libcache.so",
            ]
        } else {
            &[
                "libirisdb.so",
                "libirisdb.dylib",
                "libcache.so",
                "libcache.dylib",
            ]
        }
    } else if cfg!(windows) {
        &["cache.dll", "irisdb.dll"]
    } else if cfg!(target_os = "macos") {
        &[
            "libcache.dylib",
            "libcache.so",
            "libirisdb.dylib",
            "libirisdb.so",
        ]
    } else {
        &[
            "libcache.so",
            "libcache.dylib",
            "libirisdb.so",
            "libirisdb.dylib",
        ]
    };
    names
        .iter()
        .map(|name| format!("{}{}", libdir, name))
        .collect()
}

fn file_name(path: &str) -> &str {
    match path.rfind(|c| c == '/' || c == '\\') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Map a configured device to the engine's terminal argument. The
/// console's own name means the engine default (an empty device), the
/// platform null device means no terminal at all.
fn device_string(device: &str, console: &str) -> Option<String> {
    if device.is_empty() {
        return None;
    }
    if device.eq_ignore_ascii_case(console) {
        return Some(String::new());
    }
    if device == super::NULL_DEVICE {
        return None;
    }
    Some(device.to_string())
}

fn auth_failure_text(rc: c_int) -> String {
    match rc {
        status::ACCESS_DENIED => format!(
            "Authentication: CacheSecureStart() : Access Denied : Check the audit log for the real authentication error ({})\n",
            rc
        ),
        status::CHANGE_PASSWORD => format!(
            "Authentication: CacheSecureStart() : Password Change Required ({})\n",
            rc
        ),
        status::CONNECTION_BROKEN => format!(
            "Authentication: CacheSecureStart() : Connection was formed and then broken by the server. ({})\n",
            rc
        ),
        status::FAILURE => format!(
            "Authentication: CacheSecureStart() : An unexpected error has occurred. ({})\n",
            rc
        ),
        status::STRING_TOO_LONG => format!(
            "Authentication: CacheSecureStart() : prinp or prout is too long. ({})\n",
            rc
        ),
        _ => format!("Authentication: CacheSecureStart() : Failed ({})\n", rc),
    }
}

/// Object handles travel as decimal text.
fn parse_oref(args: &[Argument<'_>]) -> c_uint {
    let text = args.first().map(|arg| arg.to_text()).unwrap_or_default();
    text.trim().parse::<i64>().unwrap_or(0) as c_uint
}

/// A NUL-terminated byte copy for entry points taking writable C
/// strings. Interior NULs cut the value short, as they would in C.
fn c_buffer(text: &str) -> Vec<u8> {
    let end = text.find('\0').unwrap_or(text.len());
    let mut buf = Vec::with_capacity(end + 1);
    buf.extend_from_slice(&text.as_bytes()[..end]);
    buf.push(0);
    buf
}

/// Pick the version fields out of a `$ZVersion` report.
///
/// The scanner accepts the first space-preceded number shaped like a
/// version: a single digit and a dot in the classic `1.0` to `5.2`
/// range, or a four-digit year release. Minor follows the first dot,
/// build follows `Build `. The display text is formatted even when
/// nothing was recognized.
fn parse_isc_zv(text: &str) -> EngineVersion {
    let product = if text.contains("Cache") {
        EngineKind::Cache
    } else {
        EngineKind::Iris
    };

    let bytes = text.as_bytes();
    let mut token: Option<&str> = None;
    for n in 1..bytes.len() {
        if bytes[n - 1] == b' ' && bytes[n].is_ascii_digit() {
            let tail = &text[n..];
            let value = leading_f64(tail);
            if tail.as_bytes().get(1) == Some(&b'.') && (1.0..=5.2).contains(&value) {
                token = Some(tail);
                break;
            }
            if tail.as_bytes().get(4) == Some(&b'.') && value >= 2000.0 {
                token = Some(tail);
                break;
            }
        }
    }

    let (major, minor, build, number) = match token {
        Some(tail) => {
            let major = leading_i32(tail);
            let minor = tail
                .find('.')
                .map(|idx| leading_i32(&tail[idx + 1..]))
                .unwrap_or(0);
            let build = tail
                .find("Build ")
                .map(|idx| leading_i32(&tail[idx + 6..]))
                .unwrap_or(0);
            let base = if major >= 2007 { major - 2000 } else { major };
            let number = (base * 100_000 + minor * 10_000 + build) as u32;
            (major, minor, build, number)
        }
        None => (0, 0, 0, 0),
    };

    EngineVersion {
        product,
        major,
        minor,
        build,
        number,
        text: format!("{}.{}.b{}", major, minor, build),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_directory_swaps_last_component() {
        assert_eq!(library_directory("/usr/cachesys/mgr"), "/usr/cachesys/bin/");
        assert_eq!(
            library_directory("/usr/cachesys/mgr/"),
            "/usr/cachesys/bin/"
        );
        assert_eq!(library_directory("/opt/irissys/mgr"), "/opt/irissys/bin/");
    }

    #[test]
    fn test_library_directory_backslash() {
        assert_eq!(
            library_directory("C:\\InterSystems\\mgr\\"),
            "C:\\InterSystems\\bin\\"
        );
    }

    #[test]
    fn test_library_directory_without_separator() {
        assert_eq!(library_directory("cachesys"), "cachesys");
        // A leading separator alone never matches the scan.
        assert_eq!(library_directory("/mgr"), "/mgr");
    }

    #[test]
    fn test_candidate_order_prefers_requested_flavour() {
        let iris = candidate_paths(EngineKind::Iris, "/opt/irissys/bin/");
        let cache = candidate_paths(EngineKind::Cache, "/usr/cachesys/bin/");
        assert!(iris[0].contains("irisdb"));
        assert!(iris.iter().any(|p| p.contains("libcache") || p.contains("cache.dll")));
        assert!(cache[0].contains("cache"));
        assert!(cache.iter().any(|p| p.contains("irisdb")));
        assert!(iris[0].starts_with("/opt/irissys/bin/"));
    }

    #[test]
    fn test_device_mapping() {
        assert_eq!(device_string("", "stdin"), None);
        assert_eq!(device_string("stdin", "stdin"), Some(String::new()));
        assert_eq!(device_string("STDIN", "stdin"), Some(String::new()));
        assert_eq!(device_string(super::super::NULL_DEVICE, "stdin"), None);
        assert_eq!(
            device_string("/dev/tty", "stdin"),
            Some("/dev/tty".to_string())
        );
        // The console name only matches its own side.
        assert_eq!(
            device_string("stdout", "stdin"),
            Some("stdout".to_string())
        );
    }

    #[test]
    fn test_parse_zv_year_release() {
        let zv = "IRIS for UNIX (Ubuntu Server LTS for x86-64) 2021.1 (Build 215U) Wed Jun 9 2021";
        let version = parse_isc_zv(zv);
        assert_eq!(version.product, EngineKind::Iris);
        assert_eq!(version.major, 2021);
        assert_eq!(version.minor, 1);
        assert_eq!(version.build, 215);
        assert_eq!(version.number, 2110215);
        assert_eq!(version.text, "2021.1.b215");
    }

    #[test]
    fn test_parse_zv_cache_release() {
        let zv = "Cache for UNIX (Red Hat Enterprise Linux for x86-64) 2018.1.2 (Build 309U)";
        let version = parse_isc_zv(zv);
        assert_eq!(version.product, EngineKind::Cache);
        assert_eq!(version.major, 2018);
        assert_eq!(version.minor, 1);
        assert_eq!(version.build, 309);
        assert_eq!(version.number, 1810309);
    }

    #[test]
    fn test_parse_zv_classic_release() {
        let version = parse_isc_zv("Cache for UNIX 5.2 (Build 329)");
        assert_eq!(version.major, 5);
        assert_eq!(version.minor, 2);
        assert_eq!(version.build, 329);
        assert_eq!(version.number, 520329);
        assert_eq!(version.text, "5.2.b329");
    }

    #[test]
    fn test_parse_zv_unrecognized() {
        let version = parse_isc_zv("nothing versiony here");
        assert_eq!(version.major, 0);
        assert_eq!(version.number, 0);
        assert_eq!(version.text, "0.0.b0");
        assert_eq!(version.product, EngineKind::Iris);
    }

    #[test]
    fn test_split_function_reference() {
        assert_eq!(
            split_function_reference(b"start^bench"),
            Some((&b"start"[..], &b"bench"[..]))
        );
        assert_eq!(
            split_function_reference(b"^routine"),
            Some((&b""[..], &b"routine"[..]))
        );
        assert_eq!(split_function_reference(b"noseparator"), None);
        assert_eq!(split_function_reference(b""), None);
    }

    #[test]
    fn test_auth_failure_texts() {
        assert_eq!(
            auth_failure_text(status::ACCESS_DENIED),
            "Authentication: CacheSecureStart() : Access Denied : Check the audit log for the real authentication error (-15)\n"
        );
        assert_eq!(
            auth_failure_text(status::STRING_TOO_LONG),
            "Authentication: CacheSecureStart() : prinp or prout is too long. (-3)\n"
        );
        assert_eq!(
            auth_failure_text(-99),
            "Authentication: CacheSecureStart() : Failed (-99)\n"
        );
    }

    #[test]
    fn test_parse_oref() {
        let args = [Argument::Str(b"5")];
        assert_eq!(parse_oref(&args), 5);
        let args = [Argument::Str(b"nonsense")];
        assert_eq!(parse_oref(&args), 0);
        assert_eq!(parse_oref(&[]), 0);
    }

    #[test]
    fn test_c_buffer_cuts_at_nul() {
        assert_eq!(c_buffer("abc"), b"abc\0");
        assert_eq!(c_buffer("ab\0cd"), b"ab\0");
        assert_eq!(c_buffer(""), b"\0");
    }
}
